//! Request matching.
//!
//! A [`MatchCriteria`] is a set of optional criteria ANDed together. Absent
//! criteria impose no constraint, so `MatchCriteria::default()` matches every
//! request.
//!
//! - `url` - literal suffix, glob and regex URL matchers
//! - `field` - shallow, strict and custom predicates over query and header maps

mod field;
mod url;

pub use field::{FieldPredicate, MapPredicate};
pub use url::{GlobPattern, UrlMatcher};

use crate::error::{panic_message, ConfigError, InterceptError};
use crate::request::{RequestSnapshot, ResourceType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// User predicate over the raw request body text.
pub type BodyPredicate = Arc<dyn Fn(&str) -> anyhow::Result<bool> + Send + Sync>;

/// Which resource types a criterion accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawResourceTypeMatch", into = "RawResourceTypeMatch")]
pub enum ResourceTypeMatch {
    #[default]
    All,
    Only(Vec<ResourceType>),
}

impl ResourceTypeMatch {
    pub fn one(resource_type: ResourceType) -> Self {
        ResourceTypeMatch::Only(vec![resource_type])
    }

    pub fn accepts(&self, resource_type: ResourceType) -> bool {
        match self {
            ResourceTypeMatch::All => true,
            ResourceTypeMatch::Only(types) => types.contains(&resource_type),
        }
    }
}

/// Wire form: `"all"`, a single type name, or a list of names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawResourceTypeMatch {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<RawResourceTypeMatch> for ResourceTypeMatch {
    type Error = ConfigError;

    fn try_from(raw: RawResourceTypeMatch) -> Result<Self, Self::Error> {
        match raw {
            RawResourceTypeMatch::One(s) if s.trim().eq_ignore_ascii_case("all") => {
                Ok(ResourceTypeMatch::All)
            }
            RawResourceTypeMatch::One(s) => Ok(ResourceTypeMatch::one(s.parse()?)),
            RawResourceTypeMatch::Many(names) => names
                .iter()
                .map(|n| n.parse())
                .collect::<Result<Vec<_>, _>>()
                .map(ResourceTypeMatch::Only),
        }
    }
}

impl From<ResourceTypeMatch> for RawResourceTypeMatch {
    fn from(m: ResourceTypeMatch) -> Self {
        match m {
            ResourceTypeMatch::All => RawResourceTypeMatch::One("all".to_string()),
            ResourceTypeMatch::Only(types) => {
                RawResourceTypeMatch::Many(types.iter().map(|t| t.as_str().to_string()).collect())
            }
        }
    }
}

/// Optional criteria a request must satisfy.
#[derive(Clone, Default)]
pub struct MatchCriteria {
    pub resource_type: Option<ResourceTypeMatch>,
    pub method: Option<String>,
    pub url: Option<UrlMatcher>,
    pub query: Option<FieldPredicate>,
    /// Header keys are compared lower-cased.
    pub headers: Option<FieldPredicate>,
    pub body: Option<BodyPredicate>,
    pub cross_domain: Option<bool>,
    pub https: Option<bool>,
}

impl MatchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(ResourceTypeMatch::one(resource_type));
        self
    }

    pub fn resource_types(mut self, types: ResourceTypeMatch) -> Self {
        self.resource_type = Some(types);
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Literal suffix, or glob when the pattern contains `*` or `?`.
    pub fn url(mut self, pattern: &str) -> Self {
        self.url = Some(UrlMatcher::parse(pattern));
        self
    }

    pub fn url_regex(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.url = Some(UrlMatcher::regex(pattern)?);
        Ok(self)
    }

    pub fn url_matcher(mut self, matcher: UrlMatcher) -> Self {
        self.url = Some(matcher);
        self
    }

    pub fn query(mut self, predicate: FieldPredicate) -> Self {
        self.query = Some(predicate);
        self
    }

    pub fn headers(mut self, predicate: FieldPredicate) -> Self {
        self.headers = Some(predicate.lowercase_keys());
        self
    }

    /// Predicate over the raw body text. Errors and panics count as no match.
    ///
    /// Runs while the owning rule registry is locked, so it must not add or
    /// remove rules on the same session.
    pub fn body<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(predicate));
        self
    }

    pub fn cross_domain(mut self, cross_domain: bool) -> Self {
        self.cross_domain = Some(cross_domain);
        self
    }

    pub fn https(mut self, https: bool) -> Self {
        self.https = Some(https);
        self
    }

    pub fn matches(&self, snapshot: &RequestSnapshot) -> bool {
        matches(snapshot, self)
    }
}

impl fmt::Debug for MatchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchCriteria")
            .field("resource_type", &self.resource_type)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| ".."))
            .field("cross_domain", &self.cross_domain)
            .field("https", &self.https)
            .finish()
    }
}

/// Whether `snapshot` satisfies every present criterion.
pub fn matches(snapshot: &RequestSnapshot, criteria: &MatchCriteria) -> bool {
    if let Some(types) = &criteria.resource_type {
        if !types.accepts(snapshot.resource_type) {
            return false;
        }
    }
    if let Some(method) = &criteria.method {
        if !method.eq_ignore_ascii_case(&snapshot.method) {
            return false;
        }
    }
    if let Some(cross_domain) = criteria.cross_domain {
        if cross_domain != snapshot.cross_domain {
            return false;
        }
    }
    if let Some(https) = criteria.https {
        if https != snapshot.https {
            return false;
        }
    }
    if let Some(url) = &criteria.url {
        if !url.matches(&snapshot.url) {
            return false;
        }
    }
    if let Some(query) = &criteria.query {
        if !query.matches(&snapshot.query) {
            return false;
        }
    }
    if let Some(headers) = &criteria.headers {
        if !headers.matches(&snapshot.headers) {
            return false;
        }
    }
    if let Some(body) = &criteria.body {
        match evaluate_body(body, &snapshot.body) {
            Ok(matched) => return matched,
            Err(e) => {
                warn!(url = %snapshot.url, "{e}, treating as no match");
                return false;
            }
        }
    }
    true
}

fn evaluate_body(predicate: &BodyPredicate, body: &str) -> Result<bool, InterceptError> {
    match catch_unwind(AssertUnwindSafe(|| predicate(body))) {
        Ok(Ok(matched)) => Ok(matched),
        Ok(Err(e)) => Err(InterceptError::Matcher(format!("{e:#}"))),
        Err(payload) => {
            let message = panic_message(payload);
            debug!("body predicate panicked: {message}");
            Err(InterceptError::Matcher(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::PageUrl;
    use crate::transport::OutgoingRequest;
    use bytes::Bytes;

    fn snapshot(method: &str, url: &str, body: &str, rt: ResourceType) -> RequestSnapshot {
        let page = PageUrl::parse("http://localhost:3000/").unwrap();
        let mut request = OutgoingRequest::new(method, url)
            .header("X-Requested-With", "snag")
            .header("Accept", "application/json");
        request.body = Some(Bytes::from(body.to_string()));
        let uri = page.resolve(url).unwrap();
        RequestSnapshot::capture(&page, &uri, &request, rt)
    }

    fn get(url: &str) -> RequestSnapshot {
        snapshot("GET", url, "", ResourceType::Fetch)
    }

    #[test]
    fn test_empty_criteria_matches_everything() {
        assert!(MatchCriteria::new().matches(&get("/anything")));
    }

    #[test]
    fn test_method_is_case_insensitive() {
        assert!(MatchCriteria::new().method("get").matches(&get("/a")));
        assert!(!MatchCriteria::new().method("POST").matches(&get("/a")));
    }

    #[test]
    fn test_resource_type() {
        let xhr = snapshot("GET", "/a", "", ResourceType::Xhr);
        assert!(MatchCriteria::new().resource_type(ResourceType::Xhr).matches(&xhr));
        assert!(!MatchCriteria::new().resource_type(ResourceType::Fetch).matches(&xhr));
        let both = ResourceTypeMatch::Only(vec![ResourceType::Fetch, ResourceType::Xhr]);
        assert!(MatchCriteria::new().resource_types(both).matches(&xhr));
    }

    #[test]
    fn test_flags() {
        let remote = get("https://api.remote.dev/v1");
        assert!(MatchCriteria::new().cross_domain(true).https(true).matches(&remote));
        assert!(!MatchCriteria::new().cross_domain(false).matches(&remote));
        assert!(MatchCriteria::new().https(false).matches(&get("/local")));
    }

    #[test]
    fn test_all_criteria_are_anded() {
        let criteria = MatchCriteria::new()
            .method("GET")
            .url("/api/users")
            .query(FieldPredicate::shallow([("page", "2")]));
        assert!(criteria.matches(&get("/api/users?page=2&size=10")));
        assert!(!criteria.matches(&get("/api/users?page=3")));
        assert!(!criteria.matches(&get("/api/posts?page=2")));
    }

    #[test]
    fn test_headers_compare_case_insensitively() {
        let criteria = MatchCriteria::new().headers(FieldPredicate::shallow([("x-requested-with", "snag")]));
        assert!(criteria.matches(&get("/a")));
        let criteria = MatchCriteria::new().headers(FieldPredicate::shallow([("X-REQUESTED-WITH", "snag")]));
        assert!(criteria.matches(&get("/a")));
    }

    #[test]
    fn test_body_predicate() {
        let post = snapshot("POST", "/login", r#"{"user":"ana"}"#, ResourceType::Fetch);
        assert!(MatchCriteria::new().body(|b| Ok(b.contains("ana"))).matches(&post));
        assert!(!MatchCriteria::new().body(|b| Ok(b.contains("bob"))).matches(&post));
    }

    #[test]
    fn test_body_predicate_error_and_panic_are_no_match() {
        let post = snapshot("POST", "/login", "{}", ResourceType::Fetch);
        let failing = MatchCriteria::new().body(|_| anyhow::bail!("bad predicate"));
        assert!(!failing.matches(&post));
        let panicking = MatchCriteria::new().body(|_| panic!("boom"));
        assert!(!panicking.matches(&post));
    }

    #[test]
    fn test_resource_type_match_serde() {
        let all: ResourceTypeMatch = serde_yaml::from_str("all").unwrap();
        assert_eq!(all, ResourceTypeMatch::All);
        let one: ResourceTypeMatch = serde_yaml::from_str("xhr").unwrap();
        assert_eq!(one, ResourceTypeMatch::one(ResourceType::Xhr));
        let many: ResourceTypeMatch = serde_yaml::from_str("[fetch, xhr]").unwrap();
        assert!(many.accepts(ResourceType::Fetch));
        assert!(!many.accepts(ResourceType::Image));
        assert!(serde_yaml::from_str::<ResourceTypeMatch>("socket").is_err());
    }
}
