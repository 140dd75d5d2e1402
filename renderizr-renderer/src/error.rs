//! Error types for renderizr-renderer.

use std::error::Error as _;
use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while compiling or executing a template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template source file does not exist.
    #[error("missing template: {path}")]
    MissingTemplate { path: PathBuf },

    /// The template source exists but could not be read.
    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tera rejected the template source.
    #[error("unable to process template {path}: {detail}")]
    Compile {
        path: PathBuf,
        detail: String,
        #[source]
        source: tera::Error,
    },

    /// The template compiled but failed while executing against the snapshot.
    #[error("unable to execute template {path}: {detail}")]
    Execute {
        path: PathBuf,
        detail: String,
        #[source]
        source: tera::Error,
    },

    /// A check command could not be expanded.
    #[error("unable to expand command {command:?}: {detail}")]
    Command {
        command: String,
        detail: String,
        #[source]
        source: tera::Error,
    },

    /// Snapshot could not be turned into a tera context.
    #[error("context serialization error: {0}")]
    Context(#[from] tera::Error),
}

/// Flatten a tera error and its causes into one line.
///
/// Tera puts the useful part (line, column, missing variable) in the
/// source chain rather than the top-level message.
pub(crate) fn describe(err: &tera::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut cause = err.source();
    while let Some(inner) = cause {
        parts.push(inner.to_string());
        cause = inner.source();
    }
    parts.join(": ")
}
