//! Cancellation of fleet-wide operations

use tokio::sync::watch;

/// Cancellation signal shared by every unit of work in one operation.
///
/// Clones observe the same signal. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create an uncancelled token
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // `self` owns the sender, so the wait only ends on cancellation.
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clone_observes_cancel() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waits_for_signal() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        token.cancel();
        assert!(handle.await.is_ok());
    }
}
