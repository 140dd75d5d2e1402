//! Run configuration: global flags, backend parameters, and the optional
//! YAML config file.
//!
//! Everything here is built once at startup and handed to the coordinator by
//! value. Nothing is mutated afterwards.
//!
//! # Config file layout
//!
//! ```yaml
//! prefix: /production
//! templates:
//!   - src: /etc/renderizr/nginx.conf.tmpl
//!     dest: /etc/nginx/nginx.conf
//!     prefix: /nginx
//!     owner: "0:0"
//!     mode: "0644"
//!     check_cmd: /usr/sbin/nginx -t -c {{ src }}
//!     reload_cmd: /usr/sbin/nginx -s reload
//!     watch: true
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{io_err, ConfigError};
use crate::record::parse_template_record;
use crate::types::{FileMode, KeyPrefix, Owner, TemplateSpec};

pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_FS_MAX_FILE_SIZE: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// GlobalConfig
// ---------------------------------------------------------------------------

/// Process-wide run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Prepended to every template's key prefix.
    pub prefix: KeyPrefix,
    /// Raw `;`-delimited template records.
    pub templates: Vec<String>,
    pub config_file: Option<PathBuf>,
    /// Render every template once and exit.
    pub onetime: bool,
    pub watch: bool,
    pub resync_interval: Duration,
    /// Report pending changes without touching destinations.
    pub noop: bool,
    pub keep_staged_file: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            prefix: KeyPrefix::root(),
            templates: Vec::new(),
            config_file: None,
            onetime: false,
            watch: false,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            noop: false,
            keep_staged_file: false,
        }
    }
}

impl GlobalConfig {
    /// Parse records and the config file into template specs.
    ///
    /// Records come first, then config file entries. Each spec's key prefix
    /// is joined under [`GlobalConfig::prefix`]. Fails with
    /// [`ConfigError::NoTemplates`] when the result is empty.
    pub fn template_specs(&self) -> Result<Vec<TemplateSpec>, ConfigError> {
        let mut specs = Vec::new();
        for record in &self.templates {
            let mut spec = parse_template_record(record, &self.prefix)?;
            spec.keep_staged_file |= self.keep_staged_file;
            specs.push(spec);
        }

        if let Some(path) = &self.config_file {
            let file = ConfigFile::load(path)?;
            let prefix = match &file.prefix {
                Some(p) => self.prefix.join(p),
                None => self.prefix.clone(),
            };
            for entry in file.templates {
                let mut spec = entry.into_spec(&prefix)?;
                spec.keep_staged_file |= self.keep_staged_file;
                specs.push(spec);
            }
        }

        if specs.is_empty() {
            return Err(ConfigError::NoTemplates);
        }
        Ok(specs)
    }
}

// ---------------------------------------------------------------------------
// BackendConfig
// ---------------------------------------------------------------------------

/// Store backend parameters; each variant carries only its own fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Consul {
        endpoints: Vec<String>,
        scheme: String,
        token: Option<String>,
    },
    Etcd {
        endpoints: Vec<String>,
        scheme: String,
    },
    /// Keys are znodes; values are their data.
    Zookeeper { endpoints: Vec<String> },
    /// Keys are files below `root`; values are file contents.
    Fs { root: PathBuf, max_file_size: u64 },
}

/// Backend discriminant, used for logging and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Consul,
    Etcd,
    Zookeeper,
    Fs,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Consul => write!(f, "consul"),
            BackendKind::Etcd => write!(f, "etcd"),
            BackendKind::Zookeeper => write!(f, "zookeeper"),
            BackendKind::Fs => write!(f, "fs"),
        }
    }
}

impl BackendConfig {
    pub fn consul_default() -> Self {
        BackendConfig::Consul {
            endpoints: vec!["127.0.0.1:8500".to_string()],
            scheme: "http".to_string(),
            token: None,
        }
    }

    pub fn etcd_default() -> Self {
        BackendConfig::Etcd {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            scheme: "http".to_string(),
        }
    }

    pub fn zookeeper_default() -> Self {
        BackendConfig::Zookeeper {
            endpoints: vec!["127.0.0.1:2181".to_string()],
        }
    }

    pub fn fs(root: impl Into<PathBuf>) -> Self {
        BackendConfig::Fs {
            root: root.into(),
            max_file_size: DEFAULT_FS_MAX_FILE_SIZE,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Consul { .. } => BackendKind::Consul,
            BackendConfig::Etcd { .. } => BackendKind::Etcd,
            BackendConfig::Zookeeper { .. } => BackendKind::Zookeeper,
            BackendConfig::Fs { .. } => BackendKind::Fs,
        }
    }

    pub fn supports_watch(&self) -> bool {
        match self {
            BackendConfig::Consul { .. }
            | BackendConfig::Etcd { .. }
            | BackendConfig::Zookeeper { .. } => true,
            BackendConfig::Fs { .. } => false,
        }
    }

    /// Reject parameters no client could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Backend {
            backend: self.kind().to_string(),
            reason: reason.to_string(),
        };
        match self {
            BackendConfig::Consul {
                endpoints, scheme, ..
            }
            | BackendConfig::Etcd { endpoints, scheme } => {
                if endpoints.iter().all(|e| e.trim().is_empty()) {
                    return Err(invalid("at least one endpoint is required"));
                }
                if scheme != "http" && scheme != "https" {
                    return Err(invalid("scheme must be http or https"));
                }
            }
            BackendConfig::Zookeeper { endpoints } => {
                if endpoints.iter().all(|e| e.trim().is_empty()) {
                    return Err(invalid("at least one endpoint is required"));
                }
            }
            BackendConfig::Fs { root, .. } => {
                if root.as_os_str().is_empty() {
                    return Err(invalid("root must not be empty"));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

/// On-disk YAML configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
}

/// One template as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateEntry {
    pub src: PathBuf,
    pub dest: PathBuf,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub check_cmd: Option<String>,
    #[serde(default)]
    pub reload_cmd: Option<String>,
    #[serde(default)]
    pub keep_stage_file: bool,
    #[serde(default)]
    pub watch: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let file: ConfigFile =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(
            path = %path.display(),
            templates = file.templates.len(),
            "loaded config file"
        );
        Ok(file)
    }
}

impl TemplateEntry {
    fn into_spec(self, prefix: &KeyPrefix) -> Result<TemplateSpec, ConfigError> {
        let key_prefix = match &self.prefix {
            Some(p) => prefix.join(p),
            None => prefix.clone(),
        };
        let mut spec = TemplateSpec::new(self.src, self.dest)?.with_key_prefix(key_prefix);
        if let Some(owner) = self.owner.as_deref().filter(|s| !s.is_empty()) {
            spec.owner = Some(owner.parse::<Owner>()?);
        }
        if let Some(mode) = self.mode.as_deref().filter(|s| !s.is_empty()) {
            spec.mode = Some(mode.parse::<FileMode>()?);
        }
        spec.check_command = self.check_cmd.filter(|s| !s.is_empty());
        spec.reload_command = self.reload_cmd.filter(|s| !s.is_empty());
        spec.keep_staged_file = self.keep_stage_file;
        spec.watch = self.watch;
        Ok(spec)
    }
}
