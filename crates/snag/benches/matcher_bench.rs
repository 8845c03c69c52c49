use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snag::matcher::{matches, FieldPredicate, MatchCriteria};
use snag::registry::{MockResponse, RuleRegistry};
use snag::request::{PageUrl, RequestSnapshot, ResourceType};
use snag::transport::OutgoingRequest;

fn snapshot(url: &str) -> RequestSnapshot {
    let page = PageUrl::parse("http://localhost:3000/").unwrap();
    let request = OutgoingRequest::new("GET", url)
        .header("Accept", "application/json")
        .header("X-Client", "bench");
    RequestSnapshot::from_request(&page, &request, ResourceType::Fetch).unwrap()
}

fn suffix_rule(i: usize) -> MatchCriteria {
    MatchCriteria::new()
        .method("GET")
        .url(&format!("/api/v1/endpoint{i}"))
}

fn glob_rule(i: usize) -> MatchCriteria {
    MatchCriteria::new().url(&format!("/api/*/endpoint{i}"))
}

fn regex_rule(i: usize) -> MatchCriteria {
    MatchCriteria::new()
        .url_regex(&format!(r"/api/v\d+/endpoint{i}$"))
        .unwrap()
}

fn registry_of(count: usize, rule: fn(usize) -> MatchCriteria) -> RuleRegistry<MockResponse> {
    let registry = RuleRegistry::new();
    for i in 0..count {
        // unlimited, so consume_match never drops a rule
        registry.add(rule(i), MockResponse::new().body("{}"), 0);
    }
    registry
}

fn bench_criteria(c: &mut Criterion) {
    let mut group = c.benchmark_group("criteria");
    let request = snapshot("/api/v1/endpoint7?page=2&size=20");

    let cases = [
        ("suffix", suffix_rule(7)),
        ("glob", glob_rule(7)),
        ("regex", regex_rule(7)),
        (
            "full",
            suffix_rule(7)
                .query(FieldPredicate::shallow([("page", "2")]))
                .headers(FieldPredicate::shallow([("x-client", "bench")]))
                .body(|b| Ok(b.is_empty())),
        ),
    ];

    group.throughput(Throughput::Elements(1));
    for (name, criteria) in cases.iter() {
        group.bench_function(*name, |b| {
            b.iter(|| matches(black_box(&request), black_box(criteria)))
        });
    }
    group.finish();
}

fn bench_registry_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_scan");

    for rule_count in [10, 100, 1000].iter() {
        let first = snapshot("/api/v1/endpoint0");
        let last = snapshot(&format!("/api/v1/endpoint{}", rule_count - 1));
        let miss = snapshot("/static/app.js");

        group.throughput(Throughput::Elements(1));
        for (label, rule) in [
            ("suffix", suffix_rule as fn(usize) -> MatchCriteria),
            ("glob", glob_rule),
            ("regex", regex_rule),
        ] {
            let registry = registry_of(*rule_count, rule);
            group.bench_with_input(
                BenchmarkId::new(format!("{label}_first"), rule_count),
                rule_count,
                |b, _| b.iter(|| registry.consume_match(black_box(&first))),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("{label}_last"), rule_count),
                rule_count,
                |b, _| b.iter(|| registry.consume_match(black_box(&last))),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("{label}_miss"), rule_count),
                rule_count,
                |b, _| b.iter(|| registry.consume_match(black_box(&miss))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_criteria, bench_registry_scan);
criterion_main!(benches);
