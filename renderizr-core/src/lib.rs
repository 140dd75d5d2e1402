//! renderizr core library: domain types, template records, run configuration.
//!
//! - [`types`]: newtypes and [`TemplateSpec`]
//! - [`record`]: `;`-delimited template record parser
//! - [`config`]: [`GlobalConfig`], [`BackendConfig`], YAML config file
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod record;
pub mod types;

pub use config::{BackendConfig, BackendKind, ConfigFile, GlobalConfig, TemplateEntry};
pub use error::ConfigError;
pub use record::parse_template_record;
pub use types::{FileMode, KeyPrefix, KvPair, Owner, TemplateSpec, DEFAULT_FILE_MODE};
