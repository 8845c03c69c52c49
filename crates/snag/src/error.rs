//! Error taxonomy for the interception pipeline.
//!
//! Instrumentation-path failures (resolution hooks, `done`/`error` callbacks,
//! body predicates) are contained inside the pipeline and only ever logged.
//! Body-delivery failures surface as [`InterceptError`] and are projected by
//! each adapter into its own native convention.

use std::any::Any;
use thiserror::Error;

/// Errors produced while driving a request through the pipeline.
///
/// `Clone` so a single broken response stream can report the same failure to
/// every reader of the shared body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterceptError {
    /// Resolution hook or one of its callbacks failed. Contained, never
    /// delivered to the caller.
    #[error("resolution hook failed: {0}")]
    Hook(String),
    /// A mock body generator failed while the network bypass was disabled.
    #[error("mock body generator failed: {0}")]
    MockGeneration(String),
    /// The real response body broke mid-read.
    #[error("response stream failed: {0}")]
    Stream(String),
    /// A user body predicate failed. Treated as a non-match.
    #[error("body matcher failed: {0}")]
    Matcher(String),
    /// The call was aborted through its signal.
    #[error("request was aborted")]
    Cancelled,
    /// The transport could not complete the request.
    #[error("network request failed: {0}")]
    Network(String),
    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl InterceptError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InterceptError::Cancelled)
    }
}

/// Errors raised while loading or compiling configuration and rule files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid page url '{url}': {reason}")]
    InvalidPageUrl { url: String, reason: String },
    #[error("invalid url regex '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule {index} in '{section}': {reason}")]
    InvalidRule {
        section: &'static str,
        index: usize,
        reason: String,
    },
    #[error("unknown resource type '{0}'")]
    UnknownResourceType(String),
    #[error("{0}")]
    Invalid(String),
}

/// Failure to parse a request body into structured form.
///
/// Raised lazily, only when a body generator asks for the parsed body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("request body is not valid {format}: {reason}")]
pub struct BodyParseError {
    pub format: &'static str,
    pub reason: String,
}

/// Render a caught panic payload as text for logging and error messages.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
