//! Cooperative cancellation for long-running cluster operations

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{KubeError, Result};

/// Cloneable cancellation flag. Cancelling any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of self, so this only ends on cancel
        let _ = rx.wait_for(|c| *c).await;
    }

    /// Sleep for `duration`, returning [`KubeError::Cancelled`] if cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if self.is_cancelled() {
            return Err(KubeError::Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(KubeError::Cancelled),
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(KubeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let token = Cancellation::new();
        let other = token.clone();
        let handle = tokio::spawn(async move { other.sleep(Duration::from_secs(60)).await });
        token.cancel();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(KubeError::Cancelled)));
        assert!(token.check().is_err());
    }

    #[tokio::test]
    async fn test_sleep_completes() {
        let token = Cancellation::new();
        token.sleep(Duration::from_millis(1)).await.unwrap();
        assert!(!token.is_cancelled());
    }
}
