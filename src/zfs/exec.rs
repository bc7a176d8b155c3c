//! Process execution for the driver.
//!
//! The transient failure signature (remote shell exiting 255) is
//! recognized here and nowhere else; the core only ever sees the
//! `Transience` classification.

use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;

use crate::Transience;
use crate::logs::Logbook;

/// Exit status of a dropped ssh connection.
const TRANSIENT_STATUS: i32 = 255;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The transient signature; retrying may succeed.
    #[error("`{command}` exited with transient status 255: {output}")]
    Transient { command: String, output: String },

    #[error("`{command}` exited with status {status}: {output}")]
    Failed {
        command: String,
        status: i32,
        output: String,
    },

    #[error("`{command}` was terminated by a signal: {output}")]
    Killed { command: String, output: String },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from `{command}`: {reason}")]
    Parse { command: String, reason: String },

    #[error("refusing `{command}`: driver is read-only")]
    ReadOnly { command: String },
}

impl DriverError {
    pub fn transience(&self) -> Transience {
        match self {
            DriverError::Transient { .. } => Transience::Retryable,
            _ => Transience::Permanent,
        }
    }

    /// The probed dataset does not exist on that side.
    pub fn is_missing_dataset(&self) -> bool {
        self.output_text().contains("dataset does not exist")
    }

    /// A resumable receive left partial state behind; it must be
    /// aborted before the resume can be retried.
    pub fn is_partial_receive_state(&self) -> bool {
        self.output_text()
            .contains("contains partially-complete state")
    }

    fn output_text(&self) -> &str {
        match self {
            DriverError::Transient { output, .. }
            | DriverError::Failed { output, .. }
            | DriverError::Killed { output, .. } => output,
            _ => "",
        }
    }

    pub(crate) fn from_status(command: &str, status: ExitStatus, output: String) -> DriverError {
        match status.code() {
            Some(TRANSIENT_STATUS) => DriverError::Transient {
                command: command.to_string(),
                output,
            },
            Some(status) => DriverError::Failed {
                command: command.to_string(),
                status,
                output,
            },
            None => DriverError::Killed {
                command: command.to_string(),
                output,
            },
        }
    }
}

/// Executes driver command lines, locally or through a remote shell.
pub trait Shell: Send + Sync {
    /// Run a command line to completion. Returns trimmed, non-empty
    /// stdout lines.
    fn run(&self, logs: &Logbook, line: &str) -> Result<Vec<String>, DriverError>;

    /// Build (but do not spawn) the process for one end of a transfer
    /// pipeline.
    fn command(&self, line: &str) -> Command;

    /// How this command renders in logs.
    fn describe(&self, line: &str) -> String;
}

fn run_command(mut cmd: Command, desc: &str, logs: &Logbook) -> Result<Vec<String>, DriverError> {
    logs.log(desc.to_string());

    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|source| DriverError::Spawn {
            command: desc.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = [stdout.trim(), stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("; ")
            .replace('\n', "; ");
        return Err(DriverError::from_status(desc, output.status, combined));
    }

    Ok(stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Runs command lines directly on this host.
pub struct LocalShell;

impl Shell for LocalShell {
    fn run(&self, logs: &Logbook, line: &str) -> Result<Vec<String>, DriverError> {
        run_command(self.command(line), &self.describe(line), logs)
    }

    fn command(&self, line: &str) -> Command {
        let mut parts = line.split_whitespace();
        let program = parts.next().unwrap_or("false");
        let mut cmd = Command::new(program);
        cmd.args(parts);
        cmd
    }

    fn describe(&self, line: &str) -> String {
        line.to_string()
    }
}

/// Runs command lines on the remote host over an authenticated shell.
pub struct RemoteShell {
    key: PathBuf,
    host: String,
}

impl RemoteShell {
    pub fn new(key: PathBuf, host: impl Into<String>) -> Self {
        RemoteShell {
            key,
            host: host.into(),
        }
    }
}

impl Shell for RemoteShell {
    fn run(&self, logs: &Logbook, line: &str) -> Result<Vec<String>, DriverError> {
        run_command(self.command(line), &self.describe(line), logs)
    }

    fn command(&self, line: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i").arg(&self.key).arg(&self.host).arg(line);
        cmd
    }

    fn describe(&self, line: &str) -> String {
        format!("ssh {} \"{line}\"", self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn status_255_classifies_as_transient() {
        let err = DriverError::from_status("ssh host zfs list", ExitStatus::from_raw(255 << 8), String::new());
        assert!(matches!(err, DriverError::Transient { .. }));
        assert!(err.transience().is_retryable());
    }

    #[test]
    fn other_statuses_are_permanent() {
        let err = DriverError::from_status("zfs list", ExitStatus::from_raw(1 << 8), String::new());
        assert!(matches!(err, DriverError::Failed { status: 1, .. }));
        assert!(!err.transience().is_retryable());
    }

    #[test]
    fn signal_death_is_killed() {
        let err = DriverError::from_status("zfs send", ExitStatus::from_raw(9), String::new());
        assert!(matches!(err, DriverError::Killed { .. }));
    }

    #[test]
    fn output_probes_match_driver_phrases() {
        let missing = DriverError::Failed {
            command: "zfs list".into(),
            status: 1,
            output: "cannot open 'backup/tank': dataset does not exist".into(),
        };
        assert!(missing.is_missing_dataset());
        assert!(!missing.is_partial_receive_state());

        let partial = DriverError::Failed {
            command: "zfs receive".into(),
            status: 1,
            output: "cannot receive: destination contains partially-complete state".into(),
        };
        assert!(partial.is_partial_receive_state());
    }

    #[test]
    fn local_shell_runs_and_splits_lines() {
        let logs = Logbook::new("test");
        let lines = LocalShell
            .run(&logs, "printf a\\nb\\n")
            .expect("printf runs");
        assert_eq!(lines, ["a", "b"]);
        assert_eq!(logs.entries().len(), 1);
    }

    #[test]
    fn local_shell_failure_carries_status() {
        let logs = Logbook::new("test");
        let err = LocalShell.run(&logs, "false").expect_err("false fails");
        assert!(matches!(err, DriverError::Failed { status: 1, .. }));
    }

    #[test]
    fn remote_shell_wraps_the_line_in_ssh() {
        let shell = RemoteShell::new(PathBuf::from("/root/.ssh/key"), "root@backup");
        let cmd = shell.command("zfs list -H tank");
        assert_eq!(cmd.get_program(), "ssh");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-i", "/root/.ssh/key", "root@backup", "zfs list -H tank"]);
    }
}
