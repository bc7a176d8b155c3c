//! Plan synthesis and validation.

use std::fmt;

use time::OffsetDateTime;

use super::error::ModelError;
use super::inventory::Inventory;
use super::operation::Operation;
use super::snapshot::Side;

/// Execution status of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// An operation plus its execution record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub op: Operation,
    pub status: StepStatus,
    pub started_at: Option<OffsetDateTime>,
    pub stopped_at: Option<OffsetDateTime>,
    pub error: Option<String>,
}

impl PlanStep {
    pub fn new(op: Operation) -> Self {
        PlanStep {
            op,
            status: StepStatus::Pending,
            started_at: None,
            stopped_at: None,
            error: None,
        }
    }

    pub fn duration(&self) -> Option<time::Duration> {
        match (self.started_at, self.stopped_at) {
            (Some(started), Some(stopped)) => Some(stopped - started),
            _ => None,
        }
    }
}

/// Ordered operation sequence taking a dataset from current to target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn from_operations(ops: Vec<Operation>) -> Self {
        Plan {
            steps: ops.into_iter().map(PlanStep::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Synthesize the operation sequence from `current` to `target`.
///
/// Deletions come first (they free retention obligations before anything
/// is sent), collapsed into ranges per adjacency group. Transfers follow:
/// an initial send when the remote is empty, then one incremental per
/// missing snapshot, each chained on the previous. Fails when the remote
/// has diverged from local history.
pub fn plan_transition(current: &Inventory, target: &Inventory) -> Result<Plan, ModelError> {
    let mut ops = Vec::new();

    let local_dels = current.local.difference(&target.local);
    let remote_dels = current.remote.difference(&target.remote);

    for (side, host, dels) in [
        (Side::Local, &current.local, &local_dels),
        (Side::Remote, &current.remote, &remote_dels),
    ] {
        for group in host.group_by_adjacency(dels) {
            let oldest = group.oldest().expect("adjacency groups are non-empty");
            if group.len() == 1 {
                ops.push(Operation::DeleteOne {
                    side,
                    snapshot: oldest.clone(),
                });
            } else {
                let newest = group.newest().expect("adjacency groups are non-empty");
                ops.push(Operation::DeleteRange {
                    side,
                    start: oldest.clone(),
                    end: newest.clone(),
                });
            }
        }
    }

    let mut transfers = target.remote.difference(&current.remote);
    if transfers.is_empty() {
        return Ok(Plan::from_operations(ops));
    }

    let shared = current.remote.intersection(&current.local);
    let mut base = shared.newest().cloned();

    if base.is_none() && !current.remote.is_empty() {
        return Err(ModelError::NoSharedSnapshot);
    }

    if current.remote.is_empty() {
        let first = transfers
            .oldest()
            .cloned()
            .expect("non-empty transfer set has an oldest");
        ops.push(Operation::TransferInitial {
            snapshot: first.clone(),
        });
        transfers.del(&first);
        base = Some(first);
    }

    let mut base = base.expect("transfer base exists past the empty-remote case");
    if !current.local.has(&base) {
        return Err(ModelError::MissingTransferBase { base: base.id() });
    }

    for snap in transfers.iter() {
        ops.push(Operation::TransferIncremental {
            start: base.clone(),
            end: snap.clone(),
        });
        base = snap.clone();
    }

    Ok(Plan::from_operations(ops))
}

/// Simulate `plan` against a clone of `current` and require that it
/// lands exactly on `target`. Pure: no drivers are consulted.
pub fn validate_plan(
    current: &Inventory,
    target: &Inventory,
    plan: &Plan,
) -> Result<(), ModelError> {
    let mut state = current.clone();
    for step in &plan.steps {
        state = step.op.apply(&state)?;
    }

    if state != *target {
        return Err(ModelError::TargetMismatch {
            diff: target.diff(&state),
        });
    }
    Ok(())
}
