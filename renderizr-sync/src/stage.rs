//! Staged files: rendered output written next to its destination before the
//! atomic swap.
//!
//! The staged file lives in the destination's directory so the final rename
//! never crosses a filesystem. Its name is `.<dest-basename>` plus a random
//! suffix. Dropping a [`StagedFile`] deletes it unless retention was asked for.

use std::fs::{File, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::{PathPersistError, TempPath};

use renderizr_core::{FileMode, Owner};

use crate::error::{stage_err, SyncError};

#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    temp: Option<TempPath>,
    keep: bool,
}

impl StagedFile {
    /// Write `content` to a fresh staged file for `dest` and apply `mode` and
    /// `owner`.
    pub fn create(
        dest: &Path,
        content: &[u8],
        mode: FileMode,
        owner: Option<Owner>,
        keep: bool,
    ) -> Result<Self, SyncError> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| stage_err(&dir, e))?;

        let base = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let named = tempfile::Builder::new()
            .prefix(&format!(".{base}"))
            .tempfile_in(&dir)
            .map_err(|e| stage_err(&dir, e))?;
        let (file, temp) = named.into_parts();

        // From here on Drop owns cleanup of the staged path.
        let staged = StagedFile {
            path: temp.to_path_buf(),
            temp: Some(temp),
            keep,
        };
        staged.fill(file, content, mode, owner)?;
        Ok(staged)
    }

    fn fill(
        &self,
        mut file: File,
        content: &[u8],
        mode: FileMode,
        owner: Option<Owner>,
    ) -> Result<(), SyncError> {
        file.write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| stage_err(&self.path, e))?;
        file.set_permissions(Permissions::from_mode(mode.bits()))
            .map_err(|e| stage_err(&self.path, e))?;
        if let Some(owner) = owner {
            std::os::unix::fs::fchown(&file, Some(owner.uid), Some(owner.gid))
                .map_err(|e| stage_err(&self.path, e))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the staged file over `dest` with `persist`.
    ///
    /// On failure the staged file is handed back so Drop still applies the
    /// retention rule.
    pub(crate) fn persist_with<F>(&mut self, dest: &Path, persist: F) -> Result<(), std::io::Error>
    where
        F: FnOnce(TempPath, &Path) -> Result<(), PathPersistError>,
    {
        let Some(temp) = self.temp.take() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "staged file already consumed",
            ));
        };
        match persist(temp, dest) {
            Ok(()) => Ok(()),
            Err(PathPersistError { error, path }) => {
                self.temp = Some(path);
                Err(error)
            }
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let Some(temp) = self.temp.take() else {
            return;
        };
        if self.keep {
            match temp.keep() {
                Ok(path) => tracing::debug!(path = %path.display(), "keeping staged file"),
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e.error, "unable to keep staged file"),
            }
        } else {
            // TempPath removes the file when dropped.
            drop(temp);
        }
    }
}

/// Default persist strategy: an atomic `rename(2)`.
pub(crate) fn rename_into_place(temp: TempPath, dest: &Path) -> Result<(), PathPersistError> {
    temp.persist(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    #[test]
    fn staged_file_sits_next_to_destination() {
        let tmp = TempDir::new().expect("tempdir");
        let dest = tmp.path().join("conf").join("app.conf");
        let staged = StagedFile::create(&dest, b"x=1\n", FileMode(0o640), None, false).unwrap();

        assert_eq!(staged.path().parent(), dest.parent());
        let name = staged.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".app.conf"), "got {name}");
        let meta = std::fs::metadata(staged.path()).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o640);
        assert_eq!(std::fs::read_to_string(staged.path()).unwrap(), "x=1\n");
    }

    #[test]
    fn drop_removes_unless_kept() {
        let tmp = TempDir::new().expect("tempdir");
        let dest = tmp.path().join("a.conf");

        let staged = StagedFile::create(&dest, b"a", FileMode(0o644), None, false).unwrap();
        let removed = staged.path().to_path_buf();
        drop(staged);
        assert!(!removed.exists());

        let staged = StagedFile::create(&dest, b"a", FileMode(0o644), None, true).unwrap();
        let kept = staged.path().to_path_buf();
        drop(staged);
        assert!(kept.exists());
    }

    #[test]
    fn persist_moves_file_into_place() {
        let tmp = TempDir::new().expect("tempdir");
        let dest = tmp.path().join("b.conf");
        let mut staged = StagedFile::create(&dest, b"b", FileMode(0o644), None, false).unwrap();
        let staged_path = staged.path().to_path_buf();
        staged.persist_with(&dest, rename_into_place).unwrap();
        drop(staged);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "b");
        assert!(!staged_path.exists());
    }
}
