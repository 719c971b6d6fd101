//! Broadcast shutdown signal for producer lanes.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Sending is infallible and idempotent, so it can be used both before any lane subscribed
/// and after every lane already exited.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to every current and future subscriber.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Creates a new receiver subscription.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }

    /// Returns `true` once [`ShutdownTx::shutdown`] was called.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is requested.
    ///
    /// Also returns when the transmitter is dropped, which is treated as a shutdown.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }
}

/// Creates a new shutdown channel in the "running" state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
