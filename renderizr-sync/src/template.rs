//! [`TemplateRenderer`]: one render cycle for one managed file.
//!
//! ## Render cycle
//!
//! 1. Resolve target mode and owner (template, else existing destination,
//!    else `0644` / process owner).
//! 2. Replace the KV snapshot with the new pairs, prefix stripped.
//! 3. Compile and execute the template.
//! 4. Stage the output next to the destination with mode and owner applied.
//! 5. Describe staged file and destination.
//! 6. Equal descriptors: nothing to do.
//! 7. Noop: report and stop.
//! 8. Run the check command against the staged file.
//! 9. Rename over the destination; fall back to an in-place write when the
//!    destination is a busy mount point.
//! 10. Run the reload command.
//!
//! The whole cycle holds the renderer's lock, so at most one render per
//! destination runs at a time.

use std::fs::Permissions;
use std::io::ErrorKind;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::{PathPersistError, TempPath};

use renderizr_core::{FileMode, KvPair, Owner, TemplateSpec, DEFAULT_FILE_MODE};
use renderizr_renderer::{render_command, render_template, KvSnapshot};

use crate::command::run_shell;
use crate::descriptor::{describe, in_sync};
use crate::diff::pending_diff;
use crate::error::{io_err, SyncError};
use crate::stage::{rename_into_place, StagedFile};

// ---------------------------------------------------------------------------
// Render outcome
// ---------------------------------------------------------------------------

/// Outcome of one render cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Destination already matched the rendered output.
    Unchanged { path: PathBuf },
    /// Destination was replaced.
    Written { path: PathBuf },
    /// Noop mode: the destination *would* have been replaced.
    WouldWrite { path: PathBuf },
}

impl RenderOutcome {
    pub fn path(&self) -> &Path {
        match self {
            RenderOutcome::Unchanged { path }
            | RenderOutcome::Written { path }
            | RenderOutcome::WouldWrite { path } => path,
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateRenderer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TemplateRenderer {
    spec: TemplateSpec,
    noop: bool,
    snapshot: Mutex<KvSnapshot>,
}

impl TemplateRenderer {
    pub fn new(spec: TemplateSpec, noop: bool) -> Self {
        TemplateRenderer {
            spec,
            noop,
            snapshot: Mutex::new(KvSnapshot::new()),
        }
    }

    pub fn spec(&self) -> &TemplateSpec {
        &self.spec
    }

    pub fn destination(&self) -> &Path {
        &self.spec.destination
    }

    /// Run one render cycle with `pairs` as the complete store view.
    pub fn render(&self, pairs: Vec<KvPair>) -> Result<RenderOutcome, SyncError> {
        self.render_with(pairs, rename_into_place)
    }

    pub(crate) fn render_with<F>(
        &self,
        pairs: Vec<KvPair>,
        persist: F,
    ) -> Result<RenderOutcome, SyncError>
    where
        F: FnOnce(TempPath, &Path) -> Result<(), PathPersistError>,
    {
        let mut snapshot = self.snapshot.lock();
        let dest = self.spec.destination.as_path();

        let (mode, owner) = self.target_attributes()?;

        snapshot.replace(pairs, &self.spec.key_prefix);
        let content = render_template(&self.spec.source, &snapshot)?;

        let mut staged = StagedFile::create(
            dest,
            content.as_bytes(),
            mode,
            owner,
            self.spec.keep_staged_file,
        )?;

        let staged_desc = describe(staged.path())?;
        let dest_desc = describe(dest)?;
        if in_sync(staged_desc.as_ref(), dest_desc.as_ref()) {
            tracing::debug!(dest = %dest.display(), "target config in sync");
            return Ok(RenderOutcome::Unchanged {
                path: dest.to_path_buf(),
            });
        }

        let differs = match (&staged_desc, &dest_desc) {
            (Some(staged), Some(current)) => staged.differing_fields(current).join(","),
            _ => "missing".to_string(),
        };
        tracing::info!(dest = %dest.display(), differs = %differs, "target config out of sync");

        if self.noop {
            let diff = pending_diff(dest, staged.path())?;
            tracing::info!(dest = %dest.display(), "noop mode, not updating target\n{diff}");
            return Ok(RenderOutcome::WouldWrite {
                path: dest.to_path_buf(),
            });
        }

        if let Some(check) = &self.spec.check_command {
            self.check(check, staged.path())?;
        }

        replace(&mut staged, dest, mode, owner, persist)?;
        tracing::info!(dest = %dest.display(), "target config has been updated");

        if let Some(reload) = &self.spec.reload_command {
            self.reload(reload)?;
        }

        Ok(RenderOutcome::Written {
            path: dest.to_path_buf(),
        })
    }

    fn target_attributes(&self) -> Result<(FileMode, Option<Owner>), SyncError> {
        let dest = &self.spec.destination;
        let existing = match std::fs::metadata(dest) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(dest, e)),
        };

        let mode = match (self.spec.mode, &existing) {
            (Some(mode), _) => mode,
            (None, Some(meta)) => FileMode::from_raw(meta.mode()),
            (None, None) => DEFAULT_FILE_MODE,
        };
        let owner = self.spec.owner.or_else(|| {
            existing.as_ref().map(|meta| Owner {
                uid: meta.uid(),
                gid: meta.gid(),
            })
        });
        Ok((mode, owner))
    }

    fn check(&self, template: &str, staged: &Path) -> Result<(), SyncError> {
        let command = render_command(template, staged)?;
        match run_shell(&command) {
            Ok(out) if out.success => {
                tracing::debug!(command = %command, "check passed");
                Ok(())
            }
            Ok(out) => Err(SyncError::CheckFailed {
                command,
                output: out.output,
            }),
            Err(SyncError::Command { command, source }) => Err(SyncError::CheckFailed {
                command,
                output: source.to_string(),
            }),
            Err(other) => Err(other),
        }
    }

    fn reload(&self, command: &str) -> Result<(), SyncError> {
        let failed = |output: String| SyncError::ReloadFailed {
            command: command.to_string(),
            output,
        };
        match run_shell(command) {
            Ok(out) if out.success => {
                tracing::info!(dest = %self.destination().display(), command, "target reloaded");
                Ok(())
            }
            Ok(out) => Err(failed(out.output)),
            Err(SyncError::Command { source, .. }) => Err(failed(source.to_string())),
            Err(other) => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Replace
// ---------------------------------------------------------------------------

fn replace<F>(
    staged: &mut StagedFile,
    dest: &Path,
    mode: FileMode,
    owner: Option<Owner>,
    persist: F,
) -> Result<(), SyncError>
where
    F: FnOnce(TempPath, &Path) -> Result<(), PathPersistError>,
{
    let replace_err = |source| SyncError::Replace {
        path: dest.to_path_buf(),
        source,
    };

    match staged.persist_with(dest, persist) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::ResourceBusy => {
            tracing::info!(dest = %dest.display(), "rename failed, target is probably a mount point; writing in place");
            let contents = std::fs::read(staged.path()).map_err(replace_err)?;
            std::fs::write(dest, contents).map_err(replace_err)?;
            std::fs::set_permissions(dest, Permissions::from_mode(mode.bits()))
                .map_err(replace_err)?;
            if let Some(owner) = owner {
                std::os::unix::fs::chown(dest, Some(owner.uid), Some(owner.gid))
                    .map_err(replace_err)?;
            }
            Ok(())
        }
        Err(e) => Err(replace_err(e)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
