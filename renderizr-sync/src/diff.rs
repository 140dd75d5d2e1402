//! Unified diff of a pending change, logged in noop mode.

use std::io::ErrorKind;
use std::path::Path;

use similar::TextDiff;

use crate::error::{io_err, SyncError};

/// Diff the current destination (empty when absent) against the staged file.
pub fn pending_diff(dest: &Path, staged: &Path) -> Result<String, SyncError> {
    let existing = read_existing_or_empty(dest)?;
    let rendered = std::fs::read(staged).map_err(|e| io_err(staged, e))?;
    let rendered = String::from_utf8_lossy(&rendered);

    let old_header = format!("a{}", dest.display());
    let new_header = format!("b{}", dest.display());
    Ok(TextDiff::from_lines(existing.as_str(), rendered.as_ref())
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string())
}

fn read_existing_or_empty(path: &Path) -> Result<String, SyncError> {
    match std::fs::read(path) {
        Ok(content) => Ok(String::from_utf8_lossy(&content).into_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn diff_shows_changed_lines() {
        let tmp = TempDir::new().expect("tempdir");
        let dest = tmp.path().join("app.conf");
        let staged = tmp.path().join(".app.conf123");
        std::fs::write(&dest, "port=80\nhost=a\n").unwrap();
        std::fs::write(&staged, "port=8080\nhost=a\n").unwrap();

        let diff = pending_diff(&dest, &staged).unwrap();
        assert!(diff.contains("-port=80"));
        assert!(diff.contains("+port=8080"));
        assert!(diff.contains("@@"));
    }

    #[test]
    fn absent_destination_diffs_against_empty() {
        let tmp = TempDir::new().expect("tempdir");
        let staged = tmp.path().join(".new");
        std::fs::write(&staged, "line\n").unwrap();
        let diff = pending_diff(&tmp.path().join("new"), &staged).unwrap();
        assert!(diff.contains("+line"));
    }
}
