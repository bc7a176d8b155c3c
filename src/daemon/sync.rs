//! The reconciliation loop.
//!
//! Each cycle: re-observe everything, then walk the datasets in
//! deterministic order, refreshing, replanning and executing one at a
//! time. Errors are isolated to their dataset; a clean cycle pings the
//! heartbeat and rests until the top of the next hour-long period.

use std::time::{Duration, Instant};

use crate::Result;

use super::cancel::CancelToken;
use super::core::Daemon;
use super::executor::execute_plan;
use super::heartbeat;

const CYCLE_PERIOD: Duration = Duration::from_secs(3600);
const ENUMERATION_RETRY: Duration = Duration::from_secs(60);

pub fn run_sync_loop(daemon: &Daemon, cancel: &CancelToken) -> Result<()> {
    let logs = daemon.global_logs();
    loop {
        cancel.check()?;
        let cycle_started = Instant::now();
        logs.log("cycle start");

        if let Err(err) = daemon.refresh_all(cancel) {
            if err.is_cancelled() {
                return Err(err);
            }
            logs.log(format!("enumeration failed, retrying shortly: {err}"));
            cancel.sleep(ENUMERATION_RETRY)?;
            continue;
        }

        let mut all_ok = true;
        for name in daemon.state().names() {
            cancel.check()?;
            logs.log(format!("processing dataset '{name}'"));

            if let Err(err) = daemon.refresh_dataset(cancel, &name) {
                if err.is_cancelled() {
                    return Err(err);
                }
                all_ok = false;
                logs.log(format!("refresh of '{name}' failed: {err}"));
                continue;
            }

            if let Err(err) = daemon.replan_dataset(&name) {
                all_ok = false;
                logs.log(format!("replan of '{name}' failed: {err}"));
                daemon.dataset_logs(&name).log(format!("replan failed: {err}"));
                continue;
            }

            logs.log(format!("syncing '{name}'"));
            if let Err(err) = execute_plan(daemon, cancel, &name) {
                if err.is_cancelled() {
                    return Err(err);
                }
                all_ok = false;
                logs.log(format!("sync of '{name}' failed, skipping dataset: {err}"));
            }
        }

        logs.log("synced all datasets");
        if all_ok {
            if let Some(snitch_id) = daemon.config().snitch_id.as_deref() {
                match heartbeat::report_ok(snitch_id) {
                    Ok(()) => logs.log("heartbeat reported"),
                    Err(err) => logs.log(format!("heartbeat failed: {err}")),
                }
            }
            logs.log("cycle clean, resting");
            let elapsed = cycle_started.elapsed();
            if elapsed < CYCLE_PERIOD {
                cancel.sleep(CYCLE_PERIOD - elapsed)?;
            }
        } else {
            logs.log("cycle had errors, restarting");
        }
    }
}
