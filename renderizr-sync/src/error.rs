//! Error types for renderizr-sync.

use std::path::PathBuf;

use thiserror::Error;

use renderizr_renderer::RenderError;

/// All errors that can arise from one render cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Stat or read of the destination failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template could not be compiled or executed.
    #[error(transparent)]
    Template(#[from] RenderError),

    /// The staged file could not be created, written or chmod/chowned.
    #[error("unable to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The check command rejected the staged file.
    #[error("check command {command:?} failed: {output}")]
    CheckFailed { command: String, output: String },

    /// The staged file could not be moved over the destination.
    #[error("unable to replace {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination was updated but the reload command failed.
    #[error("reload command {command:?} failed: {output}")]
    ReloadFailed { command: String, output: String },

    /// A shell command could not be spawned at all.
    #[error("unable to run {command:?}: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn stage_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Stage {
        path: path.into(),
        source,
    }
}
