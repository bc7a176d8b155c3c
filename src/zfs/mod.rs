//! Driver adapter over the external `zfs` tool.
//!
//! Provides:
//! - `Zfs` - the per-side verb set (list, snapshot, destroy, resume)
//! - `Driver` - the local/remote pair plus operation dispatch
//! - `Shell` - local or ssh execution of driver command lines
//!
//! Dataset names are prefixed with the configured root on each side; the
//! remote executes the same verbs over an authenticated shell.

mod exec;
mod pipe;

use std::process::Command;
use std::sync::Arc;

use time::OffsetDateTime;
use time::macros::format_description;

use crate::config::Config;
use crate::daemon::CancelToken;
use crate::logs::Logbook;
use crate::model::{DatasetName, DatasetSize, Operation, Side, Snapshot};
use crate::{Error, Result};

pub use exec::{DriverError, LocalShell, RemoteShell, Shell};

#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub name: DatasetName,
    pub size: Option<DatasetSize>,
}

/// One side's view of the filesystem tool.
pub struct Zfs {
    prefix: String,
    shell: Arc<dyn Shell>,
    read_only: bool,
}

impl Zfs {
    pub fn new(prefix: impl Into<String>, shell: Arc<dyn Shell>) -> Self {
        Zfs {
            prefix: prefix.into(),
            shell,
            read_only: false,
        }
    }

    /// A driver that refuses destructive verbs. Used by `debug`.
    pub fn read_only(prefix: impl Into<String>, shell: Arc<dyn Shell>) -> Self {
        Zfs {
            prefix: prefix.into(),
            shell,
            read_only: true,
        }
    }

    pub fn with_prefix(&self, dataset: &DatasetName) -> String {
        format!("{}{}", self.prefix, dataset.path())
    }

    fn without_prefix(&self, path: &str) -> DatasetName {
        DatasetName::new(path.strip_prefix(&self.prefix).unwrap_or(path))
    }

    fn guard_destructive(&self, line: &str) -> std::result::Result<(), DriverError> {
        if self.read_only {
            return Err(DriverError::ReadOnly {
                command: line.to_string(),
            });
        }
        Ok(())
    }

    /// Enumerate datasets under the prefix with their sizes.
    pub fn list_datasets(
        &self,
        logs: &Logbook,
    ) -> std::result::Result<Vec<DatasetInfo>, DriverError> {
        let line = format!(
            "zfs list -H -p -t filesystem -o name,used,logicalreferenced -d 1000 {}",
            self.prefix
        );
        let rows = self.shell.run(logs, &line)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cols = row.split('\t');
            let name = cols.next().ok_or_else(|| DriverError::Parse {
                command: line.clone(),
                reason: format!("empty row `{row}`"),
            })?;
            let used = parse_size_field(&line, cols.next())?;
            let logical = parse_size_field(&line, cols.next())?;
            out.push(DatasetInfo {
                name: self.without_prefix(name),
                size: Some(DatasetSize {
                    used,
                    logical_referenced: logical,
                }),
            });
        }
        Ok(out)
    }

    /// Snapshots of one dataset, ascending by creation time.
    pub fn list_snapshots(
        &self,
        logs: &Logbook,
        dataset: &DatasetName,
    ) -> std::result::Result<Vec<Snapshot>, DriverError> {
        let line = format!(
            "zfs list -H -p -t snapshot -o name,creation,logicalreferenced -s creation -d 1 {}",
            self.with_prefix(dataset)
        );
        let rows = self.shell.run(logs, &line)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cols = row.split('\t');
            let full_name = cols.next().unwrap_or_default();
            let name = full_name
                .split_once('@')
                .map(|(_, name)| name)
                .ok_or_else(|| DriverError::Parse {
                    command: line.clone(),
                    reason: format!("snapshot row without `@`: `{row}`"),
                })?;
            let created_at: i64 = cols
                .next()
                .and_then(|field| field.parse().ok())
                .ok_or_else(|| DriverError::Parse {
                    command: line.clone(),
                    reason: format!("bad creation timestamp in `{row}`"),
                })?;
            let logical = cols.next().and_then(|field| field.parse::<i64>().ok());
            let mut snap = Snapshot::new(dataset.clone(), name, created_at);
            snap.logical_referenced = logical;
            out.push(snap);
        }
        Ok(out)
    }

    /// Create a `<kind>-<timestamp>` snapshot, optionally recursive.
    /// Returns the snapshot name.
    pub fn create_snapshot(
        &self,
        logs: &Logbook,
        dataset: &DatasetName,
        kind: &str,
        recursive: bool,
    ) -> std::result::Result<String, DriverError> {
        let title = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year]-[month]-[day]-[hour][minute][second]"
            ))
            .expect("timestamp format is static");
        let name = format!("{kind}-{title}");
        let flag = if recursive { "-r " } else { "" };
        let line = format!("zfs snapshot {flag}{}@{name}", self.with_prefix(dataset));
        self.guard_destructive(&line)?;
        self.shell.run(logs, &line)?;
        Ok(name)
    }

    pub fn create_dataset(
        &self,
        logs: &Logbook,
        dataset: &DatasetName,
    ) -> std::result::Result<(), DriverError> {
        let line = format!("zfs create -p {}", self.with_prefix(dataset));
        self.guard_destructive(&line)?;
        self.shell.run(logs, &line)?;
        Ok(())
    }

    pub fn destroy_snapshot(
        &self,
        logs: &Logbook,
        dataset: &DatasetName,
        name: &str,
    ) -> std::result::Result<(), DriverError> {
        let line = format!("zfs destroy {}@{name}", self.with_prefix(dataset));
        self.guard_destructive(&line)?;
        self.shell.run(logs, &line)?;
        Ok(())
    }

    /// Destroy the closed snapshot range `first%last`.
    pub fn destroy_snapshot_range(
        &self,
        logs: &Logbook,
        dataset: &DatasetName,
        first: &str,
        last: &str,
    ) -> std::result::Result<(), DriverError> {
        let line = format!("zfs destroy {}@{first}%{last}", self.with_prefix(dataset));
        self.guard_destructive(&line)?;
        self.shell.run(logs, &line)?;
        Ok(())
    }

    /// The dataset's receive resume token, if an interrupted transfer
    /// left one behind.
    pub fn resume_token(
        &self,
        logs: &Logbook,
        dataset: &DatasetName,
    ) -> std::result::Result<Option<String>, DriverError> {
        let line = format!(
            "zfs list -H -o receive_resume_token -S name -d 0 {}",
            self.with_prefix(dataset)
        );
        let rows = self.shell.run(logs, &line)?;
        match rows.first().map(String::as_str) {
            None | Some("-") => Ok(None),
            Some(token) => Ok(Some(token.to_string())),
        }
    }

    /// Discard partially-received state so a resume can start over.
    pub fn abort_resumable(
        &self,
        logs: &Logbook,
        dataset: &DatasetName,
    ) -> std::result::Result<(), DriverError> {
        let line = format!("zfs receive -A {}", self.with_prefix(dataset));
        self.guard_destructive(&line)?;
        self.shell.run(logs, &line)?;
        Ok(())
    }

    /// Dry-run a send command line and parse the size it reports.
    pub fn estimate_send_size(
        &self,
        logs: &Logbook,
        send_line: &str,
    ) -> std::result::Result<u64, DriverError> {
        if !send_line.starts_with("zfs send") {
            return Err(DriverError::Parse {
                command: send_line.to_string(),
                reason: "size estimates require a zfs send command".to_string(),
            });
        }
        let line = format!("{send_line} --dryrun --verbose --parsable");
        let rows = self.shell.run(logs, &line)?;
        let last = rows.last().ok_or_else(|| DriverError::Parse {
            command: line.clone(),
            reason: "no output".to_string(),
        })?;
        last.split_whitespace()
            .nth(1)
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| DriverError::Parse {
                command: line.clone(),
                reason: format!("no size field in `{last}`"),
            })
    }
}

/// The local/remote driver pair and the operation dispatch over it.
pub struct Driver {
    pub local: Zfs,
    pub remote: Zfs,
}

impl Driver {
    pub fn new(config: &Config) -> Self {
        Driver {
            local: Zfs::new(config.local.root.clone(), Arc::new(LocalShell)),
            remote: Zfs::new(config.remote.root.clone(), remote_shell(config)),
        }
    }

    /// A driver that refuses destructive verbs on both sides.
    pub fn read_only(config: &Config) -> Self {
        Driver {
            local: Zfs::read_only(config.local.root.clone(), Arc::new(LocalShell)),
            remote: Zfs::read_only(config.remote.root.clone(), remote_shell(config)),
        }
    }

    pub fn side(&self, side: Side) -> &Zfs {
        match side {
            Side::Local => &self.local,
            Side::Remote => &self.remote,
        }
    }

    /// Execute one plan operation against the filesystems.
    pub fn apply(&self, cancel: &CancelToken, logs: &Logbook, op: &Operation) -> Result<()> {
        match op {
            Operation::DeleteOne { side, snapshot } => {
                self.side(*side)
                    .destroy_snapshot(logs, &snapshot.dataset, &snapshot.name)?;
                Ok(())
            }
            Operation::DeleteRange { side, start, end } => {
                self.side(*side).destroy_snapshot_range(
                    logs,
                    &start.dataset,
                    &start.name,
                    &end.name,
                )?;
                Ok(())
            }
            Operation::TransferInitial { snapshot } => self.transfer_initial(cancel, logs, snapshot),
            Operation::TransferIncremental { start, end } => {
                self.transfer_incremental(cancel, logs, start, end)
            }
        }
    }

    /// Continue an interrupted transfer from its resume token.
    pub fn resume(
        &self,
        cancel: &CancelToken,
        logs: &Logbook,
        dataset: &DatasetName,
        token: &str,
    ) -> Result<()> {
        let send = format!("zfs send --raw -t {token}");
        let recv = format!("zfs receive -s {}", self.remote.with_prefix(dataset));
        self.run_pipe(cancel, logs, &send, &recv)
    }

    /// Estimated stream size for a transfer operation, when the driver
    /// can provide one. Deletions have nothing to estimate.
    pub fn estimate_transfer(&self, logs: &Logbook, op: &Operation) -> Option<u64> {
        let send = match op {
            Operation::TransferInitial { snapshot } => self.initial_send_line(snapshot),
            Operation::TransferIncremental { start, end } => {
                self.incremental_send_line(start, end)
            }
            _ => return None,
        };
        self.local.estimate_send_size(logs, &send).ok()
    }

    fn initial_send_line(&self, snapshot: &Snapshot) -> String {
        format!(
            "zfs send --raw {}@{}",
            self.local.with_prefix(&snapshot.dataset),
            snapshot.name
        )
    }

    fn incremental_send_line(&self, start: &Snapshot, end: &Snapshot) -> String {
        let path = self.local.with_prefix(&start.dataset);
        format!("zfs send --raw -i {path}@{} {path}@{}", start.name, end.name)
    }

    fn transfer_initial(
        &self,
        cancel: &CancelToken,
        logs: &Logbook,
        snapshot: &Snapshot,
    ) -> Result<()> {
        let send = self.initial_send_line(snapshot);
        let recv = format!(
            "zfs receive -s {}",
            self.remote.with_prefix(&snapshot.dataset)
        );
        self.run_pipe(cancel, logs, &send, &recv)
    }

    fn transfer_incremental(
        &self,
        cancel: &CancelToken,
        logs: &Logbook,
        start: &Snapshot,
        end: &Snapshot,
    ) -> Result<()> {
        let send = self.incremental_send_line(start, end);
        let recv = format!(
            "zfs receive -s -F {}",
            self.remote.with_prefix(&start.dataset)
        );
        self.run_pipe(cancel, logs, &send, &recv)
    }

    fn run_pipe(
        &self,
        cancel: &CancelToken,
        logs: &Logbook,
        send_line: &str,
        recv_line: &str,
    ) -> Result<()> {
        if self.local.read_only || self.remote.read_only {
            return Err(Error::Driver(DriverError::ReadOnly {
                command: format!("{send_line} | {recv_line}"),
            }));
        }
        let from: (Command, String) = (
            self.local.shell.command(send_line),
            self.local.shell.describe(send_line),
        );
        let to: (Command, String) = (
            self.remote.shell.command(recv_line),
            self.remote.shell.describe(recv_line),
        );
        pipe::pipe(cancel, logs, from, to)
    }
}

fn remote_shell(config: &Config) -> Arc<dyn Shell> {
    Arc::new(RemoteShell::new(
        config.remote.ssh_key.clone(),
        config.remote.ssh_host.clone(),
    ))
}

fn parse_size_field(
    command: &str,
    field: Option<&str>,
) -> std::result::Result<u64, DriverError> {
    // `zfs list -p` prints `-` for properties a dataset lacks.
    match field {
        None | Some("-") => Ok(0),
        Some(raw) => raw.parse().map_err(|_| DriverError::Parse {
            command: command.to_string(),
            reason: format!("bad size field `{raw}`"),
        }),
    }
}
