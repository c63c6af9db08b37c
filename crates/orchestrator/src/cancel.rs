//! Cooperative task cancellation.
//!
//! Each running task owns one token. The surrounding service (or ctrl-c
//! handler) cancels it; the loop checks it at turn boundaries and races
//! in-flight LLM and tool calls against it.

use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves when cancellation is requested. Used in `select!` arms to
    /// interrupt in-flight calls.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}

/// Race a future against the token. Returns `None` when cancelled first.
pub async fn with_cancel<T>(
    token: &CancelToken,
    fut: impl std::future::Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        _ = token.cancelled() => None,
        value = fut => Some(value),
    }
}
