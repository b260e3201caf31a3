//! Shutdown coordination.
//!
//! The server, the config reload task and the signal listener share one
//! `Shutdown`; the first `trigger` stops all of them.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Resolve once `trigger` is called. Subscribe before spawning the task
    /// that awaits this, or an early trigger is missed.
    pub async fn triggered(mut receiver: broadcast::Receiver<()>) {
        let _ = receiver.recv().await;
    }

    pub fn trigger(&self) {
        if self.tx.send(()).is_ok() {
            tracing::info!(listeners = self.tx.receiver_count(), "Shutdown triggered");
        }
    }

    /// Number of tasks still listening for shutdown.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
