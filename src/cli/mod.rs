//! CLI surface for backupd.
//!
//! `daemon` (the default) runs the service; `snapshot` asks a running
//! daemon to create one; `debug` plans a single dataset without
//! executing anything. Every mode needs root: the driver talks to the
//! pool directly.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};

use crate::daemon::{CancelToken, Daemon, run_daemon};
use crate::model::DatasetName;
use crate::zfs::Driver;
use crate::{Error, Result, config};

const SNAPSHOT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "backupd",
    version,
    about = "ZFS backup orchestrator",
    infer_subcommands = true
)]
pub struct Cli {
    /// Address of the status UI / control endpoint.
    #[arg(long, global = true, default_value = "127.0.0.1:8411", value_name = "ADDR")]
    pub addr: String,

    /// Plan and simulate only; never touch the filesystems.
    #[arg(long, global = true, default_value_t = false)]
    pub dryrun: bool,

    /// Mirror logs to this file.
    #[arg(long, global = true, value_name = "PATH")]
    pub logfile: Option<PathBuf>,

    /// Config file path (default: search the fixed hierarchy).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the backup daemon (the default).
    Daemon,

    /// Ask the running daemon to create a recursive snapshot of the
    /// local root.
    Snapshot {
        /// Policy kind to stamp the snapshot with (hourly, daily, ...).
        periodicity: String,
    },

    /// Refresh one dataset and print its plan without executing it.
    Debug {
        /// Dataset path, e.g. `/photos/2024`.
        dataset: String,
    },
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli) -> Result<()> {
    require_root()?;

    let config = match &cli.config {
        Some(path) => config::load_from(path)?,
        None => config::load()?,
    };

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => run_daemon(config, &cli.addr, cli.dryrun),
        Commands::Snapshot { periodicity } => request_snapshot(&cli.addr, &periodicity),
        Commands::Debug { dataset } => debug_dataset(config, &dataset),
    }
}

fn require_root() -> Result<()> {
    let euid = nix::unistd::Uid::effective();
    if !euid.is_root() {
        return Err(Error::NotRoot {
            euid: euid.as_raw(),
        });
    }
    Ok(())
}

/// POST to the running daemon's snapshot endpoint.
fn request_snapshot(addr: &str, periodicity: &str) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(SNAPSHOT_REQUEST_TIMEOUT)
        .build()
        .map_err(|err| Error::DaemonRequest {
            reason: err.to_string(),
        })?;

    let url = format!("http://{addr}/snapshot?periodicity={periodicity}");
    let response = client
        .post(&url)
        .send()
        .map_err(|err| Error::DaemonRequest {
            reason: format!("calling {url}: {err}"),
        })?;

    let status = response.status();
    let body = response.text().unwrap_or_default();
    if !status.is_success() {
        return Err(Error::DaemonRequest {
            reason: format!("snapshot endpoint returned {status}: {}", body.trim()),
        });
    }

    println!("{}", body.trim());
    Ok(())
}

/// Plan one dataset against a read-only driver and print the result.
fn debug_dataset(config: config::Config, dataset: &str) -> Result<()> {
    let name = if dataset == "/" || dataset.is_empty() {
        DatasetName::root()
    } else {
        DatasetName::new(dataset)
    };

    let driver = Driver::read_only(&config);
    let daemon = Daemon::with_driver(config, driver, true);
    let cancel = CancelToken::new();
    cancel.cancel_on_signals()?;

    let report = daemon.debug_dataset(&cancel, &name)?;
    print!("{report}");
    Ok(())
}
