use super::MockResponse;
use std::time::Duration;

/// Delay injected before a matched request proceeds.
///
/// The embedded mock only applies when no other mock source matched.
#[derive(Debug, Clone, Default)]
pub struct Throttle {
    pub delay_ms: u64,
    pub mock: Option<MockResponse>,
}

impl Throttle {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            mock: None,
        }
    }

    pub fn with_mock(mut self, mock: MockResponse) -> Self {
        self.mock = Some(mock);
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
