//! File descriptors: the tuple compared to decide whether a destination is
//! already in sync.
//!
//! Two files are in sync when owner, group, permission bits and SHA-256
//! content digest are all equal.

use std::io::{ErrorKind, Read};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use sha2::{Digest, Sha256};

use renderizr_core::FileMode;

use crate::error::{io_err, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub uid: u32,
    pub gid: u32,
    pub mode: FileMode,
    /// Lowercase hex SHA-256 of the content.
    pub digest: String,
}

impl FileDescriptor {
    /// Names of the fields that differ from `other`, in comparison order.
    pub fn differing_fields(&self, other: &FileDescriptor) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.uid != other.uid {
            fields.push("uid");
        }
        if self.gid != other.gid {
            fields.push("gid");
        }
        if self.mode != other.mode {
            fields.push("mode");
        }
        if self.digest != other.digest {
            fields.push("digest");
        }
        fields
    }
}

/// Describe the file at `path`; `None` when it does not exist.
pub fn describe(path: &Path) -> Result<Option<FileDescriptor>, SyncError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    Ok(Some(FileDescriptor {
        uid: meta.uid(),
        gid: meta.gid(),
        mode: FileMode::from_raw(meta.mode()),
        digest: digest_file(path)?,
    }))
}

fn digest_file(path: &Path) -> Result<String, SyncError> {
    let mut file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `true` only when both files exist and every field matches.
pub fn in_sync(staged: Option<&FileDescriptor>, dest: Option<&FileDescriptor>) -> bool {
    matches!((staged, dest), (Some(a), Some(b)) if a == b)
}
