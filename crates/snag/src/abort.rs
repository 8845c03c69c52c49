//! Abort controller/signal pair over a cancellation token.

use tokio_util::sync::CancellationToken;

/// Owner side: aborting cancels every signal handed out.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
        }
    }

    pub fn abort(&self) {
        self.token.cancel();
    }
}

/// Observer side passed along with a request.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub async fn fired(&self) {
        self.token.cancelled().await
    }
}
