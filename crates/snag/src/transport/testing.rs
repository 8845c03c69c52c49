//! Scripted transport for pipeline and adapter tests.

use super::{BoxError, OutgoingRequest, RealResponse, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) struct ScriptedTransport {
    status: u16,
    body: String,
    headers: HashMap<String, String>,
    broken_stream: bool,
    refuse: bool,
    latency: Option<Duration>,
    sends: AtomicUsize,
    requests: Mutex<Vec<OutgoingRequest>>,
}

impl ScriptedTransport {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            broken_stream: false,
            refuse: false,
            latency: None,
            sends: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Body yields its first half and then fails.
    pub fn broken_stream(mut self) -> Self {
        self.broken_stream = true;
        self
    }

    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<OutgoingRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RealResponse, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.refuse {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let body = Bytes::from(self.body.clone());
        let chunks: Vec<Result<Bytes, BoxError>> = if self.broken_stream {
            vec![
                Ok(body.slice(..body.len() / 2)),
                Err("connection reset mid-body".into()),
            ]
        } else {
            vec![Ok(body)]
        };

        Ok(RealResponse {
            status: self.status,
            status_text: hyper::StatusCode::from_u16(self.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("")
                .to_string(),
            headers: self.headers.clone(),
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }
}
