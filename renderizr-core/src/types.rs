//! Domain types shared by every renderizr crate.
//!
//! All path fields use `PathBuf`. Values that carry a parsing rule (owner,
//! mode, key prefix) are newtypes so the rule is applied exactly once, at
//! construction.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Permission bits applied when neither the template nor an existing
/// destination provide them.
pub const DEFAULT_FILE_MODE: FileMode = FileMode(0o644);

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Numeric owner of a rendered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

impl FromStr for Owner {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidOwner {
            value: s.to_string(),
        };
        let (uid, gid) = s.split_once(':').ok_or_else(invalid)?;
        let uid = uid.trim().parse::<u32>().map_err(|_| invalid())?;
        let gid = gid.trim().parse::<u32>().map_err(|_| invalid())?;
        Ok(Owner { uid, gid })
    }
}

/// Unix permission bits (`0o7777` range).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMode(pub u32);

impl FileMode {
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Keep only permission, setuid/setgid and sticky bits.
    pub fn from_raw(raw: u32) -> Self {
        FileMode(raw & 0o7777)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl FromStr for FileMode {
    type Err = ConfigError;

    /// Accepts `0644`, `644` and `0o644`; always octal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0o")
            .or_else(|| trimmed.strip_prefix("0O"))
            .unwrap_or(trimmed);
        match u32::from_str_radix(digits, 8) {
            Ok(bits) if !digits.is_empty() && bits <= 0o7777 => Ok(FileMode(bits)),
            _ => Err(ConfigError::InvalidMode {
                value: s.to_string(),
            }),
        }
    }
}

/// Store key prefix, always rooted at `/`.
///
/// Normalization collapses repeated slashes and drops a trailing slash, so
/// `app//db/` and `/app/db` are the same prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    pub fn new(raw: &str) -> Self {
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        KeyPrefix(format!("/{}", segments.join("/")))
    }

    pub fn root() -> Self {
        KeyPrefix("/".to_string())
    }

    /// `join("/", self, child)`, normalized.
    pub fn join(&self, child: &str) -> Self {
        KeyPrefix::new(&format!("{}/{}", self.0, child))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Strip this prefix from `key` on a segment boundary and re-root the rest.
    ///
    /// Keys outside the prefix are only normalized.
    pub fn strip(&self, key: &str) -> String {
        let key = KeyPrefix::new(key);
        if self.is_root() {
            return key.0;
        }
        match key.0.strip_prefix(self.0.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => key.0,
        }
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        KeyPrefix::root()
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for KeyPrefix {
    fn from(s: &str) -> Self {
        KeyPrefix::new(s)
    }
}

// ---------------------------------------------------------------------------
// Store data
// ---------------------------------------------------------------------------

/// One key/value pair as returned by a store client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KvPair {
            key: key.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateSpec
// ---------------------------------------------------------------------------

/// Static description of one managed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// `None` inherits the owner of an existing destination.
    pub owner: Option<Owner>,
    /// `None` inherits the mode of an existing destination, else
    /// [`DEFAULT_FILE_MODE`].
    pub mode: Option<FileMode>,
    pub key_prefix: KeyPrefix,
    /// Shell command run against the staged file; `{{ src }}` expands to its path.
    pub check_command: Option<String>,
    pub reload_command: Option<String>,
    pub keep_staged_file: bool,
    /// Per-template override of the global watch flag.
    pub watch: Option<bool>,
}

impl TemplateSpec {
    /// Build a spec with every optional field unset.
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let source = source.into();
        let destination = destination.into();
        if source.as_os_str().is_empty() {
            return Err(ConfigError::MissingField { field: "source" });
        }
        if destination.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "destination",
            });
        }
        Ok(TemplateSpec {
            source,
            destination,
            owner: None,
            mode: None,
            key_prefix: KeyPrefix::root(),
            check_command: None,
            reload_command: None,
            keep_staged_file: false,
            watch: None,
        })
    }

    pub fn with_key_prefix(mut self, prefix: KeyPrefix) -> Self {
        self.key_prefix = prefix;
        self
    }

    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_mode(mut self, mode: FileMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_check_command(mut self, command: impl Into<String>) -> Self {
        self.check_command = Some(command.into());
        self
    }

    pub fn with_reload_command(mut self, command: impl Into<String>) -> Self {
        self.reload_command = Some(command.into());
        self
    }

    pub fn keep_staged_file(mut self, keep: bool) -> Self {
        self.keep_staged_file = keep;
        self
    }

    /// Whether this template should be watched given the global flag.
    pub fn effective_watch(&self, global_watch: bool) -> bool {
        self.watch.unwrap_or(global_watch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefix_normalization() {
        assert_eq!(KeyPrefix::new("app").as_str(), "/app");
        assert_eq!(KeyPrefix::new("//app//db/").as_str(), "/app/db");
        assert_eq!(KeyPrefix::new("").as_str(), "/");
        assert_eq!(KeyPrefix::new("/").join("svc").as_str(), "/svc");
        assert_eq!(KeyPrefix::new("/a").join("/b/").as_str(), "/a/b");
    }

    #[test]
    fn strip_respects_segment_boundaries() {
        let prefix = KeyPrefix::new("/app");
        assert_eq!(prefix.strip("/app/db/host"), "/db/host");
        assert_eq!(prefix.strip("app/db"), "/db");
        assert_eq!(prefix.strip("/app"), "/");
        assert_eq!(prefix.strip("/application"), "/application");
        assert_eq!(KeyPrefix::root().strip("foo"), "/foo");
    }

    #[test]
    fn file_mode_parses_octal_forms() {
        assert_eq!("0640".parse::<FileMode>().unwrap(), FileMode(0o640));
        assert_eq!("640".parse::<FileMode>().unwrap(), FileMode(0o640));
        assert_eq!("0o4755".parse::<FileMode>().unwrap(), FileMode(0o4755));
        assert!("0999".parse::<FileMode>().is_err());
        assert!("".parse::<FileMode>().is_err());
        assert!("77777".parse::<FileMode>().is_err());
        assert_eq!(FileMode(0o600).to_string(), "0600");
    }

    #[test]
    fn owner_requires_numeric_pair() {
        assert_eq!(
            "1000:1001".parse::<Owner>().unwrap(),
            Owner {
                uid: 1000,
                gid: 1001
            }
        );
        assert!("root:root".parse::<Owner>().is_err());
        assert!("1000".parse::<Owner>().is_err());
    }

    #[test]
    fn template_spec_rejects_empty_paths() {
        assert!(matches!(
            TemplateSpec::new("", "/etc/x"),
            Err(ConfigError::MissingField { field: "source" })
        ));
        assert!(matches!(
            TemplateSpec::new("/tpl", ""),
            Err(ConfigError::MissingField {
                field: "destination"
            })
        ));
    }

    #[test]
    fn effective_watch_prefers_template_override() {
        let spec = TemplateSpec::new("a", "b").unwrap();
        assert!(spec.effective_watch(true));
        let spec = TemplateSpec {
            watch: Some(false),
            ..spec
        };
        assert!(!spec.effective_watch(true));
    }
}
