//! Error types for renderizr-core.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems discovered before any processor starts.
///
/// Every variant is fatal: the process refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `--template` records nor a config file supplied a template.
    #[error("provide at least one template")]
    NoTemplates,

    /// A `;`-delimited template record could not be parsed.
    #[error("unable to parse template record {record:?}: {reason}")]
    Record { record: String, reason: String },

    /// A mandatory template field was empty.
    #[error("template {field} must not be empty")]
    MissingField { field: &'static str },

    /// Owner was not `uid:gid` with numeric ids.
    #[error("owner should be provided as uid:gid, got {value:?}")]
    InvalidOwner { value: String },

    /// Mode was not an octal permission string.
    #[error("mode should be an octal permission string, got {value:?}")]
    InvalidMode { value: String },

    /// Watch was requested against a backend that cannot watch.
    #[error("watch is not supported for backend {backend}")]
    WatchUnsupported { backend: String },

    /// Backend parameters are unusable (e.g. no endpoints).
    #[error("invalid {backend} backend configuration: {reason}")]
    Backend { backend: String, reason: String },

    /// Config file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for the expected shape.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
