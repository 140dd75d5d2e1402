use std::path::PathBuf;

use thiserror::Error;

use renderizr_core::{BackendKind, ConfigError};
use renderizr_sync::SyncError;

/// Failures talking to a KV store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{backend} request failed: {detail}")]
    Request { backend: BackendKind, detail: String },

    #[error("{backend} returned an unexpected response: {detail}")]
    Decode { backend: BackendKind, detail: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to start watch thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("{backend} does not support watching key prefixes")]
    WatchUnsupported { backend: BackendKind },

    #[error("watch on {prefix} closed")]
    WatchClosed { prefix: String },
}

/// Failures of one processor iteration.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{dest}: store error: {source}")]
    Store {
        dest: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("{dest}: {source}")]
    Render {
        dest: PathBuf,
        #[source]
        source: SyncError,
    },

    #[error("{task} task join failure: {detail}")]
    Join { task: String, detail: String },
}

/// Error surface of the coordinator.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("signal handler failed: {0}")]
    Signal(#[source] std::io::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
