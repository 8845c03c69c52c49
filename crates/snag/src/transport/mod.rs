//! Host networking primitive the adapters drive.
//!
//! - `http` - hyper-based HTTP/HTTPS transport
//! - `testing` - scripted in-memory transport for unit tests

mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// A request as issued by an adapter, before URL resolution.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: String,
    /// Absolute or page-relative URL
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl OutgoingRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Real response head plus its unread body.
pub struct RealResponse {
    pub status: u16,
    pub status_text: String,
    /// Keys lower-cased, repeated headers joined with `, `
    pub headers: HashMap<String, String>,
    pub body: BodyStream,
}

impl fmt::Debug for RealResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport setup failed: {0}")]
    Setup(String),
}

/// Sends a request over the network.
///
/// `url` is always absolute by the time a transport sees it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<RealResponse, TransportError>;
}
