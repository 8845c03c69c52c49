//! Resolution hooks: pluggable providers of mock decisions.

use crate::callstack::ResponseRecord;
use crate::error::InterceptError;
use crate::registry::{MockResponse, RuleId, RuleRegistry};
use crate::request::RequestSnapshot;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Consulted once per tracked request, after any throttle delay.
///
/// Returning `Ok(None)` means the hook has no opinion on this request. Errors
/// and panics are contained by the pipeline and treated the same way.
#[async_trait]
pub trait ResolutionHook: Send + Sync {
    async fn resolve(&self, request: &RequestSnapshot) -> anyhow::Result<Option<Box<dyn Resolution>>>;
}

/// Per-request handle returned by a [`ResolutionHook`].
#[async_trait]
pub trait Resolution: Send + Sync {
    /// Mock to apply, if any.
    fn mock(&self) -> Option<MockResponse> {
        None
    }

    /// Awaited once the response is known. Receives the real response
    /// before any mock was applied, or `None` when no real call was made.
    async fn done(&self, _real: Option<&ResponseRecord>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called at most once when the call fails. Never called for aborts.
    fn error(&self, _reason: &InterceptError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Serves mocks registered on the session's mock registry.
pub struct RegistryResolver {
    mocks: Arc<RuleRegistry<MockResponse>>,
}

impl RegistryResolver {
    pub fn new(mocks: Arc<RuleRegistry<MockResponse>>) -> Self {
        Self { mocks }
    }
}

#[async_trait]
impl ResolutionHook for RegistryResolver {
    async fn resolve(&self, request: &RequestSnapshot) -> anyhow::Result<Option<Box<dyn Resolution>>> {
        Ok(self.mocks.consume_match(request).map(|matched| {
            debug!(rule = %matched.id, url = %request.url, "mock rule matched");
            Box::new(RegisteredMock {
                id: matched.id,
                mock: matched.payload,
            }) as Box<dyn Resolution>
        }))
    }
}

struct RegisteredMock {
    id: RuleId,
    mock: MockResponse,
}

#[async_trait]
impl Resolution for RegisteredMock {
    fn mock(&self) -> Option<MockResponse> {
        Some(self.mock.clone())
    }

    fn error(&self, reason: &InterceptError) -> anyhow::Result<()> {
        debug!(rule = %self.id, "mocked call failed: {reason}");
        Ok(())
    }
}
