//! Cancellation token for listening and command waits.
//!
//! A `CancellationToken` can be cloned and handed to whatever observes the
//! external interrupt (e.g. a Ctrl-C handler). Listeners wait on it next to
//! their event stream and stop with `Cancelled` once it fires; commands sent
//! through [`DeviceClient::send_command_with_cancel`] give up their wait
//! with [`LinkError::Cancelled`](crate::LinkError::Cancelled).
//!
//! [`DeviceClient::send_command_with_cancel`]: crate::DeviceClient::send_command_with_cancel

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation token for cooperative cancellation of async operations.
///
/// When `cancel()` is called on any clone, all clones observe the
/// cancellation and every pending `cancelled().await` completes.
///
/// # Example
///
/// ```
/// use devlink::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel()
            // cannot slip between the check and the await.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// Drive `fut` to completion unless cancellation comes first.
    ///
    /// An already cancelled token never polls `fut`.
    pub async fn run_until_cancelled<F: Future>(
        &self,
        fut: F,
    ) -> Result<F::Output, CancelledError> {
        self.check()?;
        tokio::select! {
            biased;

            _ = self.cancelled() => Err(CancelledError),
            output = fut => Ok(output),
        }
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::LinkError {
    fn from(_: CancelledError) -> Self {
        crate::error::LinkError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
        assert_eq!(token2.check(), Err(CancelledError));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn test_run_until_cancelled_completes() {
        let token = CancellationToken::new();
        let result = token.run_until_cancelled(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_run_until_cancelled_stops_pending_future() {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.cancel();
            })
        };

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            token.run_until_cancelled(std::future::pending::<()>()),
        )
        .await
        .expect("cancel should end the wait");
        assert_eq!(result, Err(CancelledError));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_cancelled_skips_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = token
            .run_until_cancelled(async { polled.store(true, Ordering::SeqCst) })
            .await;
        assert_eq!(result, Err(CancelledError));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancelled_error_converts() {
        let err: crate::error::LinkError = CancelledError.into();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
    }
}
