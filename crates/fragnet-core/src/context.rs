//! Cancellation and deadline scope shared by every task of one operation

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline
///
/// Cloning is cheap and clones observe the same token. [`child`](Self::child)
/// derives a scope that is cancelled with its parent but can also be
/// cancelled on its own, which is how an orchestrator stops its in-flight
/// fragment tasks on the first fatal error.
#[derive(Debug, Clone, Default)]
pub struct TransferContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl TransferContext {
    /// Context with no deadline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    /// Replace the deadline, keeping the earlier of the two
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Child scope sharing this deadline
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this scope and all children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Deadline, if any
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Underlying token
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail fast if cancelled or expired
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` unless the scope is cancelled or expires first
    ///
    /// Cancellation wins over the deadline, which wins over completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`]; the
    /// future is dropped in both cases.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(Error::Cancelled),
            () = expiry => Err(Error::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }

    /// Sleep for `duration` under this scope
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = TransferContext::new();
        assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let ctx = TransferContext::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move {
            waiter.run(std::future::pending::<()>()).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancellation should be prompt")
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = TransferContext::with_timeout(Duration::from_millis(20));
        let result = ctx.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = TransferContext::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
        assert!(matches!(other.check(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_with_deadline_keeps_earliest() {
        let now = Instant::now();
        let ctx = TransferContext::new()
            .with_deadline(now + Duration::from_secs(10))
            .with_deadline(now + Duration::from_secs(30));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_cancel_beats_deadline() {
        let ctx = TransferContext::with_timeout(Duration::ZERO);
        ctx.cancel();
        let result = ctx.run(async {}).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
