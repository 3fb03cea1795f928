//! Shutdown signals.
//!
//! Hosts stop containers with SIGTERM; a terminal sends SIGINT. Either one
//! starts a graceful shutdown.

use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    /// Install the handlers. From here on the signals no longer kill the
    /// process; they are delivered to [`ShutdownSignals::recv`].
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown signal and report which one arrived.
    pub async fn recv(&mut self) -> SignalKind {
        tokio::select! {
            _ = self.interrupt.recv() => SignalKind::interrupt(),
            _ = self.terminate.recv() => SignalKind::terminate(),
        }
    }
}
