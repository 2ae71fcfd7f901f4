//! Two-level cooperative cancellation.
//!
//! The first request asks the controller to finish the current search pass
//! and then wrap up; any later request aborts at the next suspension point.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelLevel {
    None,
    /// Finish the current pass, then skip to report generation.
    Graceful,
    /// Stop now.
    Abort,
}

/// Shared handle; clones observe and signal the same state.
#[derive(Debug, Clone, Default)]
pub struct ResearchCancellation {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requests: AtomicU32,
    graceful: CancellationToken,
    abort: CancellationToken,
}

impl ResearchCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more cancellation request and return the new level.
    pub fn request(&self) -> CancelLevel {
        let previous = self.inner.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.graceful.cancel();
        if previous >= 1 {
            self.inner.abort.cancel();
        }
        self.level()
    }

    /// Jump straight to [`CancelLevel::Abort`].
    pub fn abort(&self) {
        self.inner.requests.fetch_max(2, Ordering::SeqCst);
        self.inner.graceful.cancel();
        self.inner.abort.cancel();
    }

    pub fn level(&self) -> CancelLevel {
        match self.inner.requests.load(Ordering::SeqCst) {
            0 => CancelLevel::None,
            1 => CancelLevel::Graceful,
            _ => CancelLevel::Abort,
        }
    }

    /// Any cancellation requested.
    pub fn is_cancelled(&self) -> bool {
        self.level() >= CancelLevel::Graceful
    }

    pub fn is_aborted(&self) -> bool {
        self.level() == CancelLevel::Abort
    }

    /// Resolves once an abort is requested.
    pub async fn aborted(&self) {
        self.inner.abort.cancelled().await
    }

    /// Resolves on the first request of any level.
    pub async fn cancelled(&self) {
        self.inner.graceful.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_escalation() {
        let cancel = ResearchCancellation::new();
        assert_eq!(cancel.level(), CancelLevel::None);
        assert!(!cancel.is_cancelled());

        assert_eq!(cancel.request(), CancelLevel::Graceful);
        assert!(cancel.is_cancelled());
        assert!(!cancel.is_aborted());

        assert_eq!(cancel.request(), CancelLevel::Abort);
        assert_eq!(cancel.request(), CancelLevel::Abort);
        assert!(cancel.is_aborted());
    }

    #[test]
    fn test_clones_share_state() {
        let a = ResearchCancellation::new();
        let b = a.clone();
        b.abort();
        assert!(a.is_aborted());
    }

    #[tokio::test]
    async fn test_aborted_future_resolves_on_second_request() {
        let cancel = ResearchCancellation::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move { waiter.aborted().await });

        cancel.request();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        cancel.request();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
