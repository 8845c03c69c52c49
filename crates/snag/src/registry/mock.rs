use crate::request::{LazyBody, RequestSnapshot};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Produces a mock body from the request. The second argument parses the
/// request body on demand.
pub type BodyGenerator =
    Arc<dyn Fn(&RequestSnapshot, &LazyBody<'_>) -> anyhow::Result<String> + Send + Sync>;

/// Response definition applied to a matched request.
///
/// With neither `body` nor `generator` the mock is partial: its status and
/// headers are laid over the real response.
#[derive(Clone, Default)]
pub struct MockResponse {
    pub body: Option<String>,
    pub generator: Option<BodyGenerator>,
    pub headers: HashMap<String, String>,
    pub status_code: Option<u16>,
    pub status_text: Option<String>,
    /// Perform the real call anyway and deliver the mocked body in its place.
    pub allow_network: bool,
}

impl MockResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and default the content type to JSON.
    pub fn json(mut self, value: &serde_json::Value) -> Self {
        self.body = Some(value.to_string());
        self.headers
            .entry("content-type".to_string())
            .or_insert_with(|| "application/json".to_string());
        self
    }

    pub fn generate<F>(mut self, generator: F) -> Self
    where
        F: Fn(&RequestSnapshot, &LazyBody<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = Some(status_text.into());
        self
    }

    pub fn allow_network(mut self, allow: bool) -> Self {
        self.allow_network = allow;
        self
    }

    /// True when the mock supplies its own body.
    pub fn replaces_body(&self) -> bool {
        self.body.is_some() || self.generator.is_some()
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockResponse")
            .field("body", &self.body)
            .field("generator", &self.generator.as_ref().map(|_| ".."))
            .field("headers", &self.headers)
            .field("status_code", &self.status_code)
            .field("status_text", &self.status_text)
            .field("allow_network", &self.allow_network)
            .finish()
    }
}
