//! End-to-end tests driving the hyper transport against a local upstream.
//!
//! Each test binds its own upstream on an ephemeral port so they can run in
//! parallel.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::json;
use snag::adapters::ReadyState;
use snag::callstack::CallFilter;
use snag::config::{RulesFile, SessionConfig, TransportConfig};
use snag::{FetchRequest, HttpTransport, MatchCriteria, MockResponse, Outcome, Session};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

struct Upstream {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn page_url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

/// Echo server: answers with the request line and body as JSON, 404 under `/missing`.
async fn start_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let method = req.method().to_string();
                        let path = req
                            .uri()
                            .path_and_query()
                            .map(|p| p.to_string())
                            .unwrap_or_default();
                        let client = req
                            .headers()
                            .get("x-client")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let body = req.into_body().collect().await?.to_bytes();
                        let status = if path.starts_with("/missing") { 404 } else { 200 };
                        let payload = json!({
                            "method": method,
                            "path": path,
                            "client": client,
                            "body": String::from_utf8_lossy(&body),
                        });
                        let response = Response::builder()
                            .status(status)
                            .header("content-type", "application/json")
                            .header("x-upstream", "echo")
                            .body(Full::new(Bytes::from(payload.to_string())))
                            .unwrap();
                        Ok::<_, hyper::Error>(response)
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    Upstream { addr, hits }
}

fn session_for(page_url: &str) -> (Session, snag::Fetch) {
    let session = Session::new(SessionConfig::new(page_url)).unwrap();
    let transport = Arc::new(HttpTransport::new(&TransportConfig::default()).unwrap());
    let fetch = session.install_fetch(transport);
    (session, fetch)
}

#[tokio::test]
async fn test_real_call_is_forwarded_and_recorded() {
    let upstream = start_upstream().await;
    let (session, fetch) = session_for(&upstream.page_url());

    let response = fetch
        .fetch(
            FetchRequest::post("/api/echo?tag=a")
                .header("X-Client", "snag-test")
                .body("ping"),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.outcome(), Outcome::Real);
    assert_eq!(response.header("x-upstream"), Some("echo"));

    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/api/echo?tag=a");
    assert_eq!(echoed["client"], "snag-test");
    assert_eq!(echoed["body"], "ping");
    assert_eq!(upstream.hits(), 1);

    let entry = session.last(&CallFilter::new()).unwrap();
    assert!(!entry.pending);
    assert_eq!(entry.status_code(), Some(200));
    let record = entry.response.unwrap();
    assert!(!record.is_mock);
    assert!(record.body.contains("\"path\":\"/api/echo?tag=a\""));
}

#[tokio::test]
async fn test_http_error_status_is_not_a_failure() {
    let upstream = start_upstream().await;
    let (session, fetch) = session_for(&upstream.page_url());

    let response = fetch.get("/missing/thing").await.unwrap();
    assert!(!response.ok());
    assert_eq!(response.status(), 404);
    assert_eq!(response.status_text(), "Not Found");
    assert_eq!(session.query(&CallFilter::new().status_code(404)).len(), 1);
}

#[tokio::test]
async fn test_mock_rules_from_yaml_short_circuit_the_network() {
    let upstream = start_upstream().await;
    let (session, fetch) = session_for(&upstream.page_url());

    let rules: RulesFile = serde_yaml::from_str(
        r#"
mocks:
  - match:
      method: GET
      url: /api/users/*
    response:
      status_code: 200
      body: { id: 1, name: "Ana" }
    times: 1
"#,
    )
    .unwrap();
    let loaded = session.load_rules(&rules).unwrap();
    assert_eq!(loaded.mocks.len(), 1);

    let first = fetch.get("/api/users/1").await.unwrap();
    assert_eq!(first.outcome(), Outcome::Mocked);
    let user: serde_json::Value = first.json().await.unwrap();
    assert_eq!(user["name"], "Ana");
    assert_eq!(upstream.hits(), 0);

    // single-use rule is gone, the second call goes upstream
    let second = fetch.get("/api/users/1").await.unwrap();
    assert_eq!(second.outcome(), Outcome::Real);
    assert_eq!(upstream.hits(), 1);

    assert_eq!(session.query(&CallFilter::new().mocked(true)).len(), 1);
    assert_eq!(session.query(&CallFilter::new().mocked(false)).len(), 1);
}

#[tokio::test]
async fn test_partial_mock_overlays_status_on_real_body() {
    let upstream = start_upstream().await;
    let (session, fetch) = session_for(&upstream.page_url());
    session.add_mock(
        MatchCriteria::new().url("/api/flaky"),
        MockResponse::new()
            .status(503)
            .header("Retry-After", "1")
            .allow_network(true),
        0,
    );

    let response = fetch.get("/api/flaky").await.unwrap();
    assert_eq!(response.outcome(), Outcome::PartiallyMocked);
    assert_eq!(response.status(), 503);
    assert_eq!(response.status_text(), "Service Unavailable");
    assert_eq!(response.header("retry-after"), Some("1"));
    assert_eq!(response.header("x-upstream"), Some("echo"));
    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["path"], "/api/flaky");
    assert_eq!(upstream.hits(), 1);

    let record = session.entries()[0].response.clone().unwrap();
    assert!(record.is_mock);
    assert_eq!(record.status_code_origin, Some(200));
}

#[tokio::test]
async fn test_throttle_delays_the_real_call() {
    let upstream = start_upstream().await;
    let (session, fetch) = session_for(&upstream.page_url());
    session.add_throttle(MatchCriteria::new().url("/slow"), 150, 0);

    let started = Instant::now();
    let response = fetch.get("/slow").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(response.outcome(), Outcome::Real);
    response.bytes().await.unwrap();

    let entry = &session.entries()[0];
    assert_eq!(entry.delay_ms, Some(150));
    assert!(entry.duration_ms.unwrap() >= 150);
}

#[tokio::test]
async fn test_refused_connection_rejects_and_records_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (session, fetch) = session_for(&format!("http://{addr}/"));
    let err = fetch.get("/api/anything").await.unwrap_err();
    assert_eq!(err.name(), "TypeError");

    let entry = &session.entries()[0];
    assert!(!entry.pending);
    assert!(entry.response.is_none());
    assert!(entry.error.is_some());
}

#[tokio::test]
async fn test_xhr_against_real_upstream() {
    let upstream = start_upstream().await;
    let session = Session::new(SessionConfig::new(upstream.page_url())).unwrap();
    let transport = Arc::new(HttpTransport::new(&TransportConfig::default()).unwrap());
    let factory = session.install_xhr(transport);

    let xhr = factory.create();
    xhr.open("PUT", "/api/items/3").unwrap();
    xhr.set_request_header("X-Client", "xhr").unwrap();
    xhr.send(Some(Bytes::from_static(b"{\"qty\":2}"))).unwrap();
    xhr.settled().await;

    assert_eq!(xhr.ready_state(), ReadyState::Done);
    assert_eq!(xhr.status(), 200);
    assert_eq!(xhr.response_header("X-Upstream").as_deref(), Some("echo"));
    let echoed: serde_json::Value = serde_json::from_str(&xhr.response_text().unwrap()).unwrap();
    assert_eq!(echoed["method"], "PUT");
    assert_eq!(echoed["client"], "xhr");
    assert_eq!(echoed["body"], "{\"qty\":2}");

    let entry = &session.entries()[0];
    assert_eq!(entry.request.resource_type.as_str(), "xhr");
}
