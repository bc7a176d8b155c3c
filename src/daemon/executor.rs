//! Plan execution for a single dataset.
//!
//! Order of business: settle any interrupted transfer (which invalidates
//! the plan in hand), validate the plan against the in-memory model,
//! then run the steps. Transient driver failures retry with linear
//! back-off; everything else is fatal for the dataset only.

use std::time::Duration;

use time::OffsetDateTime;

use crate::logs::Logbook;
use crate::model::{DatasetName, ModelError, Operation, StepStatus};
use crate::{Error, Result};

use super::cancel::CancelToken;
use super::core::Daemon;

const MAX_ATTEMPTS: u32 = 5;
const RETRY_UNIT: Duration = Duration::from_secs(60);

/// Execute the dataset's plan against the driver, mirroring each
/// completed step into the model.
pub fn execute_plan(daemon: &Daemon, cancel: &CancelToken, name: &DatasetName) -> Result<()> {
    daemon.set_sync_in_progress(name, true);
    let result = execute_inner(daemon, cancel, name);
    daemon.set_sync_in_progress(name, false);
    result
}

fn execute_inner(daemon: &Daemon, cancel: &CancelToken, name: &DatasetName) -> Result<()> {
    let logs = daemon.dataset_logs(name);

    // A finished resume changes the remote inventory, so the plan in
    // hand is stale: re-observe and re-plan before going on.
    if handle_interrupted_transfer(daemon, cancel, &logs, name)? {
        daemon.refresh_dataset(cancel, name)?;
        daemon.replan_dataset(name)?;
    }

    let model = daemon.state();
    let ds = model.get(name).ok_or_else(|| ModelError::UnknownDataset {
        name: name.to_string(),
    })?;
    let plan = ds.plan.clone().ok_or_else(|| ModelError::NoPlan {
        name: name.to_string(),
    })?;
    let target = ds.target.clone().ok_or_else(|| ModelError::NoPlan {
        name: name.to_string(),
    })?;

    crate::model::validate_plan(&ds.current, &target, &plan)?;

    for (index, step) in plan.steps.iter().enumerate() {
        cancel.check()?;
        logs.log(format!("applying `{}`", step.op));

        daemon.update_step(name, index, |step| {
            step.status = StepStatus::InProgress;
            step.started_at = Some(OffsetDateTime::now_utc());
        });

        let result = run_step(daemon, cancel, &logs, name, &step.op);

        let error_text = result.as_ref().err().map(ToString::to_string);
        daemon.update_step(name, index, |step| {
            step.stopped_at = Some(OffsetDateTime::now_utc());
            match &error_text {
                None => step.status = StepStatus::Completed,
                Some(text) => {
                    step.status = StepStatus::Failed;
                    step.error = Some(text.clone());
                }
            }
        });

        if let Err(err) = result {
            logs.log(format!("step `{}` failed: {err}", step.op));
            return Err(err);
        }
        logs.log(format!("step `{}` done", step.op));
    }

    Ok(())
}

fn run_step(
    daemon: &Daemon,
    cancel: &CancelToken,
    logs: &Logbook,
    name: &DatasetName,
    op: &Operation,
) -> Result<()> {
    // The in-memory apply must succeed before the filesystem is touched.
    let model = daemon.state();
    let ds = model.get(name).ok_or_else(|| ModelError::UnknownDataset {
        name: name.to_string(),
    })?;
    op.apply(&ds.current)?;

    if daemon.dryrun() {
        logs.log(format!("[dryrun] would apply `{op}`"));
        daemon.apply_step_to_inventory(name, op);
        return Ok(());
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        cancel.check()?;

        match daemon.driver().apply(cancel, logs, op) {
            Ok(()) => break,
            Err(err) if err.transience().is_retryable() && attempt < MAX_ATTEMPTS => {
                logs.log(format!(
                    "transient failure on attempt {attempt}, retrying: {err}"
                ));
                cancel.sleep(RETRY_UNIT * attempt)?;
            }
            Err(err) => return Err(err),
        }
    }

    daemon.apply_step_to_inventory(name, op);
    Ok(())
}

/// Settle a dangling resume token, if any. Returns whether a transfer
/// was resumed (and the inventory therefore changed).
fn handle_interrupted_transfer(
    daemon: &Daemon,
    cancel: &CancelToken,
    logs: &Logbook,
    name: &DatasetName,
) -> Result<bool> {
    let token = match daemon.driver().remote.resume_token(logs, name) {
        Ok(Some(token)) => token,
        Ok(None) => return Ok(false),
        // No remote dataset yet means nothing to resume.
        Err(err) if err.is_missing_dataset() => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    if daemon.dryrun() {
        logs.log(format!("[dryrun] would resume transfer with token {token}"));
        return Ok(false);
    }

    logs.log("resuming interrupted transfer");
    loop {
        cancel.check()?;
        match daemon.driver().resume(cancel, logs, name, &token) {
            Ok(()) => break,
            Err(Error::Driver(err)) if err.is_partial_receive_state() => {
                logs.log("aborting partially-complete receive state");
                daemon.driver().remote.abort_resumable(logs, name)?;
                logs.log("retrying resume");
            }
            Err(err) => return Err(err),
        }
    }
    logs.log("resume complete");
    Ok(true)
}
