//! Cooperative cancellation and an injectable clock for debounced work.
//!
//! A [`CancelHandle`] and its [`CancelToken`]s share a `watch` channel. The
//! handle flips the flag; tokens observe it at every await they guard.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;

/// Source of debounce delays.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Real timers backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Owning side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observing side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. A dropped handle counts as cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` until it completes or the token is cancelled, whichever
    /// comes first. Returns `None` on cancellation; `fut` is dropped.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Clock whose sleeps complete immediately.
    pub(crate) struct ImmediateClock;

    impl Clock for ImmediateClock {
        fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
            Box::pin(std::future::ready(()))
        }
    }

    #[tokio::test]
    async fn test_guard_passes_through_when_live() {
        let (_handle, token) = cancel_pair();
        assert_eq!(token.guard(async { 7 }).await, Some(7));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_stops_pending_work() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        handle.cancel();
        let out = token.guard(std::future::pending::<()>()).await;
        assert!(out.is_none());
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wakes_sleeping_guard() {
        let (handle, token) = cancel_pair();
        let task = tokio::spawn(async move {
            token
                .guard(TokioClock.sleep(Duration::from_secs(60)))
                .await
        });
        tokio::task::yield_now().await;
        handle.cancel();
        assert!(task.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_cancelled() {
        let (handle, token) = cancel_pair();
        drop(handle);
        assert!(token.guard(std::future::pending::<()>()).await.is_none());
    }
}
