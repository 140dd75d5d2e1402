//! Stop signal shared by the coordinator and every processor.
//!
//! The signal is sticky: once raised, every current and future
//! [`StopSignal`] observes it, including ones polled from blocking threads.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::DaemonError;

/// Raises the stop signal.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes the stop signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        StopHandle { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Raise the signal. Returns `false` if it was already raised.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once stop is raised or the handle is gone.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Install SIGINT and SIGTERM handlers; the returned future resolves on the
/// first of either.
pub fn termination_signal() -> Result<impl Future<Output = ()>, DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).map_err(DaemonError::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(DaemonError::Signal)?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
    })
}
