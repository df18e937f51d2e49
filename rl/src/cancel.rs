//! Run cancellation
//!
//! A cloneable flag backed by a `tokio::sync::watch` channel. `main` flips it
//! on Ctrl-C; the controller and the verifier race their in-flight work
//! against [`Cancellation::cancelled`].

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: watch::Sender<bool>,
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
        Self { tx, rx }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        debug!("Cancellation::cancel: called");
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
