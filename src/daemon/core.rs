//! Daemon core: shared state plus the refresh/replan primitives.
//!
//! All shared mutable state lives in one `Atom<Model>`; every change
//! goes through `swap` with a pure update and bumps the version cell
//! that wakes long-pollers.

use std::fmt::Write as _;

use tokio::sync::watch;

use crate::atom::Atom;
use crate::config::Config;
use crate::logs::{LogRegistry, Logbook};
use crate::model::{
    DatasetName, Model, ModelError, Operation, PlanStep, humanize_bytes, plan_transition,
    target_inventory, validate_plan,
};
use crate::zfs::Driver;
use crate::{Error, Result};

use super::cancel::CancelToken;

pub struct Daemon {
    config: Config,
    dryrun: bool,
    state: Atom<Model>,
    logs: LogRegistry,
    driver: Driver,
    version: watch::Sender<u64>,
}

impl Daemon {
    pub fn new(config: Config, dryrun: bool) -> Self {
        let driver = Driver::new(&config);
        Daemon::with_driver(config, driver, dryrun)
    }

    pub fn with_driver(config: Config, driver: Driver, dryrun: bool) -> Self {
        let (version, _) = watch::channel(0_u64);
        Daemon {
            config,
            dryrun,
            state: Atom::new(Model::new()),
            logs: LogRegistry::new(),
            driver,
            version,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dryrun(&self) -> bool {
        self.dryrun
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// A consistent snapshot of the model.
    pub fn state(&self) -> Model {
        self.state.deref()
    }

    pub fn global_logs(&self) -> &Logbook {
        self.logs.global()
    }

    pub fn dataset_logs(&self, name: &DatasetName) -> Logbook {
        self.logs.dataset(name)
    }

    /// Watch the version counter; it bumps on every state change.
    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn notify_state_change(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    /// Replace the model and observe every dataset on both sides, then
    /// plan everything for the UI.
    pub fn refresh_all(&self, cancel: &CancelToken) -> Result<()> {
        self.state.reset(Model::new());
        let logs = self.global_logs();

        for info in self.driver.local.list_datasets(logs)? {
            cancel.check()?;
            let snaps = self.driver.local.list_snapshots(logs, &info.name)?;
            self.state
                .swap(move |model| model.with_local_observation(&info.name, snaps, info.size));
        }

        for info in self.driver.remote.list_datasets(logs)? {
            cancel.check()?;
            let snaps = self.driver.remote.list_snapshots(logs, &info.name)?;
            self.state
                .swap(move |model| model.with_remote_observation(&info.name, snaps, info.size));
        }

        self.plan_all(cancel);
        self.notify_state_change();
        Ok(())
    }

    /// Re-observe one dataset on both sides. A dataset missing remotely
    /// is an empty remote side, not an error: it has simply never been
    /// transferred.
    pub fn refresh_dataset(&self, cancel: &CancelToken, name: &DatasetName) -> Result<()> {
        cancel.check()?;
        let logs = self.dataset_logs(name);

        let local = self.driver.local.list_snapshots(&logs, name)?;
        self.state
            .swap(move |model| model.with_local_observation(name, local, None));

        let remote = match self.driver.remote.list_snapshots(&logs, name) {
            Ok(snaps) => snaps,
            Err(err) if err.is_missing_dataset() => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        self.state
            .swap(move |model| model.with_remote_observation(name, remote, None));

        self.notify_state_change();
        Ok(())
    }

    /// Synthesize target and plan for one dataset and store them.
    pub fn replan_dataset(&self, name: &DatasetName) -> Result<()> {
        let model = self.state();
        let ds = model.get(name).ok_or_else(|| ModelError::UnknownDataset {
            name: name.to_string(),
        })?;

        let target = target_inventory(
            &ds.current,
            &self.config.local.policy,
            &self.config.remote.policy,
        );
        let plan = plan_transition(&ds.current, &target)?;

        self.state.swap(move |model| {
            model.with_updated(name, move |ds| {
                ds.target = Some(target);
                ds.plan = Some(plan);
            })
        });
        self.notify_state_change();
        Ok(())
    }

    /// Best-effort planning pass over every dataset; failures are logged
    /// and shown in the UI, not raised.
    pub fn plan_all(&self, cancel: &CancelToken) {
        for name in self.state().names() {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(err) = self.replan_dataset(&name) {
                self.global_logs()
                    .log(format!("planning '{name}' failed: {err}"));
            }
        }
    }

    /// Mutate one plan step in place (status, stamps, error text).
    pub fn update_step(
        &self,
        name: &DatasetName,
        index: usize,
        update: impl FnOnce(&mut PlanStep),
    ) {
        self.state.swap(move |model| {
            model.with_updated(name, move |ds| {
                if let Some(step) = ds.plan.as_mut().and_then(|plan| plan.steps.get_mut(index)) {
                    update(step);
                }
            })
        });
        self.notify_state_change();
    }

    /// Mirror an executed operation into the in-memory inventory.
    pub fn apply_step_to_inventory(&self, name: &DatasetName, op: &Operation) {
        self.state.swap(move |model| {
            model.with_updated(name, move |ds| match op.apply(&ds.current) {
                Ok(next) => ds.current = next,
                Err(err) => {
                    tracing::error!("applying `{op}` to in-memory state of '{name}': {err}");
                }
            })
        });
        self.notify_state_change();
    }

    pub fn set_sync_in_progress(&self, name: &DatasetName, value: bool) {
        self.state.swap(move |model| {
            model.with_updated(name, move |ds| ds.sync_in_progress = value)
        });
        self.notify_state_change();
    }

    /// Create a recursive snapshot at the local root and refresh the
    /// local side of every known dataset.
    pub fn create_snapshot(&self, kind: &str) -> Result<String> {
        let logs = self.global_logs();
        let name =
            self.driver
                .local
                .create_snapshot(logs, &DatasetName::root(), kind, true)?;

        for dataset in self.state().names() {
            match self.driver.local.list_snapshots(logs, &dataset) {
                Ok(snaps) => {
                    self.state
                        .swap(move |model| model.with_local_observation(&dataset, snaps, None));
                }
                Err(err) => logs.log(format!("refreshing '{dataset}' failed: {err}")),
            }
        }

        logs.log(format!(
            "created {kind} snapshot {name} for root {}",
            self.config.local.root
        ));
        self.notify_state_change();
        Ok(name)
    }

    /// Refresh one dataset and render its plan without executing it:
    /// the current/target diff, the steps, and a step-by-step simulation.
    pub fn debug_dataset(&self, cancel: &CancelToken, name: &DatasetName) -> Result<String> {
        self.refresh_dataset(cancel, name)?;
        self.replan_dataset(name)?;

        let model = self.state();
        let ds = model.get(name).ok_or_else(|| ModelError::UnknownDataset {
            name: name.to_string(),
        })?;
        let target = ds.target.as_ref().expect("replanned dataset has a target");
        let plan = ds.plan.as_ref().expect("replanned dataset has a plan");

        let logs = self.dataset_logs(name);
        let mut out = String::new();
        let _ = writeln!(out, "ACHIEVING CHANGE");
        out.push_str(&ds.current.diff(target));
        let _ = writeln!(out, "VIA PLAN");
        for step in &plan.steps {
            match self.driver.estimate_transfer(&logs, &step.op) {
                Some(bytes) => {
                    let _ = writeln!(out, "- {} (~{})", step.op, humanize_bytes(bytes));
                }
                None => {
                    let _ = writeln!(out, "- {}", step.op);
                }
            }
        }

        let _ = writeln!(out, "PLAN STEPS");
        let mut state = ds.current.clone();
        for step in &plan.steps {
            cancel.check()?;
            let next = step.op.apply(&state).map_err(Error::Model)?;
            let _ = writeln!(out, "-- {}", step.op);
            out.push_str(&state.diff(&next));
            state = next;
        }
        validate_plan(&ds.current, target, plan)?;

        Ok(out)
    }
}
