//! Local filesystem store: every regular file below `root` is a key, its
//! contents the value. Useful for tests and for hosts that receive their
//! configuration tree by other means. Watching is not supported.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use renderizr_core::{BackendKind, KvPair};

use crate::error::StoreError;
use crate::signal::StopSignal;
use crate::store::{KvStore, WatchBatch};

pub struct FsStore {
    root: PathBuf,
    max_file_size: u64,
}

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

impl FsStore {
    pub fn new(root: PathBuf, max_file_size: u64) -> Self {
        FsStore {
            root,
            max_file_size,
        }
    }

    fn collect(&self, dir: &Path, out: &mut Vec<KvPair>) -> Result<(), StoreError> {
        let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let path = entry.path();
            let meta = std::fs::metadata(&path).map_err(|e| io_err(&path, e))?;
            if meta.is_dir() {
                self.collect(&path, out)?;
            } else if meta.is_file() {
                if meta.len() > self.max_file_size {
                    tracing::warn!(
                        path = %path.display(),
                        size = meta.len(),
                        max = self.max_file_size,
                        "skipping file larger than the size limit",
                    );
                    continue;
                }
                let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
                out.push(KvPair::new(
                    self.key_for(&path),
                    String::from_utf8_lossy(&bytes).into_owned(),
                ));
            }
        }
        Ok(())
    }

    fn key_for(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let segments: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("/{}", segments.join("/"))
    }
}

impl KvStore for FsStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Fs
    }

    fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        let start = self.root.join(prefix.trim_matches('/'));
        let meta = match std::fs::metadata(&start) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&start, e)),
        };

        let mut pairs = Vec::new();
        if meta.is_dir() {
            self.collect(&start, &mut pairs)?;
        } else {
            let bytes = std::fs::read(&start).map_err(|e| io_err(&start, e))?;
            pairs.push(KvPair::new(
                self.key_for(&start),
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }
        pairs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(pairs)
    }

    fn watch_tree(
        &self,
        _prefix: &str,
        _stop: StopSignal,
    ) -> Result<mpsc::Receiver<WatchBatch>, StoreError> {
        Err(StoreError::WatchUnsupported {
            backend: BackendKind::Fs,
        })
    }

    fn supports_watch(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::StopHandle;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().expect("tempdir");
        let root = tmp.path();
        std::fs::create_dir_all(root.join("app/db")).unwrap();
        std::fs::write(root.join("app/db/host"), "10.0.0.1").unwrap();
        std::fs::write(root.join("app/name"), "demo").unwrap();
        std::fs::write(root.join("other"), "x").unwrap();
        std::fs::write(root.join("app/huge"), vec![b'a'; 64]).unwrap();
        tmp
    }

    #[test]
    fn lists_files_under_prefix_as_keys() {
        let tmp = tree();
        let store = FsStore::new(tmp.path().to_path_buf(), 32);
        let pairs = store.list("/app").unwrap();
        assert_eq!(
            pairs,
            vec![
                KvPair::new("/app/db/host", "10.0.0.1"),
                KvPair::new("/app/name", "demo"),
            ],
            "oversized file must be skipped"
        );
        assert_eq!(store.list("/").unwrap().len(), 3);
    }

    #[test]
    fn missing_prefix_is_empty() {
        let tmp = tree();
        let store = FsStore::new(tmp.path().to_path_buf(), 1024);
        assert!(store.list("/nope").unwrap().is_empty());
    }

    #[test]
    fn watch_is_unsupported() {
        let tmp = tree();
        let store = FsStore::new(tmp.path().to_path_buf(), 1024);
        assert!(!store.supports_watch());
        let err = store
            .watch_tree("/app", StopHandle::new().subscribe())
            .unwrap_err();
        assert!(matches!(err, StoreError::WatchUnsupported { .. }));
    }
}
