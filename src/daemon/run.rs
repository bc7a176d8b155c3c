//! Daemon runner.
//!
//! `backupd daemon` starts the reconciliation loop and the HTTP surface
//! as long-lived threads and runs until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::{Error, Result};

use super::cancel::CancelToken;
use super::core::Daemon;
use super::server::run_server;
use super::sync::run_sync_loop;

const JOIN_POLL: Duration = Duration::from_millis(200);

/// Run the daemon in the current process. Returns when a shutdown
/// signal is received or a long-lived thread dies.
pub fn run_daemon(config: Config, addr: &str, dryrun: bool) -> Result<()> {
    let daemon = Arc::new(Daemon::new(config, dryrun));
    let cancel = CancelToken::new();
    cancel.cancel_on_signals()?;

    if dryrun {
        daemon
            .global_logs()
            .log("dry-run mode: planning only, the filesystems stay untouched");
    }

    let server_handle = {
        let daemon = Arc::clone(&daemon);
        let cancel = cancel.clone();
        let addr = addr.to_string();
        std::thread::spawn(move || run_server(daemon, cancel, &addr))
    };

    let sync_handle = {
        let daemon = Arc::clone(&daemon);
        let cancel = cancel.clone();
        std::thread::spawn(move || run_sync_loop(&daemon, &cancel))
    };

    // Wait for a signal or for either thread to finish; on either,
    // cancel everything and join both.
    while !cancel.is_cancelled() && !server_handle.is_finished() && !sync_handle.is_finished() {
        std::thread::sleep(JOIN_POLL);
    }
    cancel.cancel();

    let server_result = server_handle
        .join()
        .unwrap_or_else(|_| Err(panic_error("http server")));
    let sync_result = sync_handle
        .join()
        .unwrap_or_else(|_| Err(panic_error("sync loop")));

    tracing::info!("daemon stopped");

    // A cancelled shutdown is a clean exit; anything else surfaces.
    for result in [server_result, sync_result] {
        match result {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn panic_error(which: &str) -> Error {
    Error::DaemonRequest {
        reason: format!("{which} thread panicked"),
    }
}
