//! Cooperative cancellation for synchronization passes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, SyncError};

/// A clonable cancellation flag. Cancelling aborts the remote call in
/// flight; local cleanup still runs.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless the token fires first.
    pub(crate) async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(cancelled_error());
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(cancelled_error()),
            result = fut => result,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

fn cancelled_error() -> SyncError {
    SyncError::Cancelled("synchronization cancelled by caller".into())
}
