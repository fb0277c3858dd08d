//! Run cancellation signal
//!
//! A cheap clonable handle. Every bounded wait in the engine (poll sleeps,
//! chaos holds, retry back-off) races against it so a cancelled run stops
//! promptly instead of running each wait to completion.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use super::{Error, Result};

/// Shared cancellation flag
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: std::sync::Arc<watch::Sender<bool>>,
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
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone of this handle
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been signalled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so wait_for cannot observe a closed channel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration`, returning `Error::Cancelled` if the run is
    /// cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.race(tokio::time::sleep(duration)).await
    }

    /// Drive `fut` to completion unless the run is cancelled first
    pub async fn race<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        }
    }
}
