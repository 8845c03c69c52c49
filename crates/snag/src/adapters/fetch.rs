use crate::abort::AbortSignal;
use crate::error::InterceptError;
use crate::pipeline::{Delivered, Outcome, Pipeline};
use crate::request::ResourceType;
use crate::transport::OutgoingRequest;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Rejection reasons, named after the platform's error classes.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("The operation was aborted.")]
    Abort,
    #[error("Failed to fetch: {0}")]
    Failed(#[source] InterceptError),
    #[error("Unexpected JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// `AbortError`, `TypeError` or `SyntaxError`.
    pub fn name(&self) -> &'static str {
        match self {
            FetchError::Abort => "AbortError",
            FetchError::Failed(_) => "TypeError",
            FetchError::Json(_) => "SyntaxError",
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, FetchError::Abort)
    }
}

impl From<InterceptError> for FetchError {
    fn from(err: InterceptError) -> Self {
        match err {
            InterceptError::Cancelled => FetchError::Abort,
            other => FetchError::Failed(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    signal: AbortSignal,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            signal: AbortSignal::never(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    fn into_parts(self) -> (OutgoingRequest, AbortSignal) {
        let request = OutgoingRequest {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
        };
        (request, self.signal)
    }
}

/// Settled fetch result. Any HTTP status is a success here; check [`ok`].
///
/// [`ok`]: FetchResponse::ok
#[derive(Debug)]
pub struct FetchResponse {
    delivered: Delivered,
    signal: AbortSignal,
}

impl FetchResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.delivered.status_code)
    }

    pub fn status(&self) -> u16 {
        self.delivered.status_code
    }

    pub fn status_text(&self) -> &str {
        &self.delivered.status_text
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.delivered.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.delivered
            .headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn url(&self) -> &str {
        &self.delivered.url
    }

    pub fn outcome(&self) -> Outcome {
        self.delivered.outcome
    }

    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        tokio::select! {
            biased;
            _ = self.signal.fired() => Err(FetchError::Abort),
            body = self.delivered.body.bytes() => Ok(body?),
        }
    }

    pub async fn text(self) -> Result<String, FetchError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, FetchError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Fetch adapter bound to a session.
#[derive(Clone)]
pub struct Fetch {
    pipeline: Arc<Pipeline>,
}

impl Fetch {
    pub(crate) fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let (request, signal) = request.into_parts();
        if signal.aborted() {
            debug!(url = %request.url, "fetch aborted before start");
            return Err(FetchError::Abort);
        }
        let delivered = self
            .pipeline
            .execute(request, ResourceType::Fetch, &signal)
            .await?;
        Ok(FetchResponse { delivered, signal })
    }

    pub async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.fetch(FetchRequest::get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortController;
    use crate::config::SessionConfig;
    use crate::matcher::MatchCriteria;
    use crate::registry::MockResponse;
    use crate::session::Session;
    use crate::transport::testing::ScriptedTransport;
    use serde_json::json;

    fn setup(transport: ScriptedTransport) -> (Session, Fetch, Arc<ScriptedTransport>) {
        let session = Session::new(SessionConfig::new("http://localhost:3000/")).unwrap();
        let transport = Arc::new(transport);
        let fetch = session.install_fetch(transport.clone());
        (session, fetch, transport)
    }

    #[tokio::test]
    async fn test_real_response() {
        let (session, fetch, transport) = setup(ScriptedTransport::ok(r#"{"n":1}"#));
        let response = fetch.get("/api/n").await.unwrap();
        assert!(response.ok());
        assert_eq!(response.status_text(), "OK");
        assert_eq!(response.url(), "http://localhost:3000/api/n");
        assert_eq!(response.outcome(), Outcome::Real);
        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["n"], 1);
        assert_eq!(transport.sends(), 1);
        assert!(!session.entries()[0].is_mock());
    }

    #[tokio::test]
    async fn test_http_error_status_still_resolves() {
        let (_session, fetch, _) = setup(ScriptedTransport::ok("missing").status(404));
        let response = fetch.get("/nope").await.unwrap();
        assert!(!response.ok());
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_request_fields_reach_transport_and_snapshot() {
        let (session, fetch, transport) = setup(ScriptedTransport::ok("{}"));
        let request = FetchRequest::post("/api/users?src=test")
            .header("X-Trace", "abc")
            .json(&json!({"name": "ana"}));
        fetch.fetch(request).await.unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "http://localhost:3000/api/users?src=test");
        assert_eq!(sent.body.as_deref(), Some(br#"{"name":"ana"}"#.as_slice()));

        let entry = &session.entries()[0];
        assert_eq!(entry.request.method, "POST");
        assert_eq!(entry.request.header("x-trace"), Some("abc"));
        assert_eq!(entry.request.query.get("src").map(String::as_str), Some("test"));
    }

    #[tokio::test]
    async fn test_mocked_response() {
        let (session, fetch, transport) = setup(ScriptedTransport::ok("real"));
        session.add_mock(
            MatchCriteria::new().url("/api/users"),
            MockResponse::new().json(&json!([{"id": 7}])).status(201),
            0,
        );
        let response = fetch.get("/api/users").await.unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.status_text(), "Created");
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.outcome(), Outcome::Mocked);
        assert_eq!(response.text().await.unwrap(), r#"[{"id":7}]"#);
        assert_eq!(transport.sends(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_is_type_error() {
        let (session, fetch, _) = setup(ScriptedTransport::ok("").refusing());
        let err = fetch.get("/down").await.unwrap_err();
        assert_eq!(err.name(), "TypeError");
        let entry = &session.entries()[0];
        assert!(!entry.pending);
        assert!(entry.error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_pre_aborted_signal_creates_no_entry() {
        let (session, fetch, transport) = setup(ScriptedTransport::ok("{}"));
        let controller = AbortController::new();
        controller.abort();
        let err = fetch
            .fetch(FetchRequest::get("/x").signal(controller.signal()))
            .await
            .unwrap_err();
        assert!(err.is_abort());
        assert_eq!(err.name(), "AbortError");
        assert!(session.entries().is_empty());
        assert_eq!(transport.sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_throttle_rejects_with_abort_error() {
        let (session, fetch, transport) = setup(ScriptedTransport::ok("{}"));
        session.add_throttle(MatchCriteria::new().url("/slow"), 2000, 0);

        let controller = AbortController::new();
        let signal = controller.signal();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            controller.abort();
        });
        let err = fetch
            .fetch(FetchRequest::get("/slow").signal(signal))
            .await
            .unwrap_err();

        assert!(err.is_abort());
        assert_eq!(err.name(), "AbortError");
        assert_eq!(transport.sends(), 0);
        let entry = &session.entries()[0];
        assert!(!entry.pending);
        assert!(entry.cancelled);
        assert_eq!(entry.delay_ms, Some(2000));
    }

    #[tokio::test]
    async fn test_invalid_json_is_syntax_error() {
        let (_session, fetch, _) = setup(ScriptedTransport::ok("<html>"));
        let response = fetch.get("/page").await.unwrap();
        let err = response.json::<serde_json::Value>().await.unwrap_err();
        assert_eq!(err.name(), "SyntaxError");
    }
}
