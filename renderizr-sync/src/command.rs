//! Shell command execution for check and reload hooks.

use std::process::Command;

use crate::error::SyncError;

const SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// stdout followed by stderr.
    pub output: String,
}

/// Run `command` through `/bin/sh -c` and wait for it.
///
/// A non-zero exit is reported through [`CommandOutput::success`]; only a
/// spawn failure is an error.
pub fn run_shell(command: &str) -> Result<CommandOutput, SyncError> {
    tracing::debug!(command, "running");
    let out = Command::new(SHELL)
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|source| SyncError::Command {
            command: command.to_string(),
            source,
        })?;

    let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&out.stderr));
    if !output.is_empty() {
        tracing::debug!(command, output = %output.trim_end(), "command output");
    }
    Ok(CommandOutput {
        success: out.status.success(),
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_stdout_and_stderr() {
        let out = run_shell("echo out; echo err >&2").unwrap();
        assert!(out.success);
        assert_eq!(out.output, "out\nerr\n");
    }

    #[test]
    fn nonzero_exit_is_not_an_error() {
        let out = run_shell("exit 3").unwrap();
        assert!(!out.success);
    }
}
