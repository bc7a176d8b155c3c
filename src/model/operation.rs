//! Plan operations and their in-memory semantics.
//!
//! `Operation` is a closed sum: `apply`, driver dispatch, and rendering
//! all switch exhaustively on it. `apply` mirrors what the filesystem
//! will do without touching it, so the validator and the executor share
//! one source of truth.

use std::fmt;

use super::error::ModelError;
use super::inventory::Inventory;
use super::snapshot::{Side, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Destroy a single snapshot on one side.
    DeleteOne { side: Side, snapshot: Snapshot },
    /// Destroy a contiguous run on one side, endpoints inclusive.
    DeleteRange {
        side: Side,
        start: Snapshot,
        end: Snapshot,
    },
    /// First transfer into an empty remote.
    TransferInitial { snapshot: Snapshot },
    /// Incremental send on top of `start`, which must be the remote tip.
    TransferIncremental { start: Snapshot, end: Snapshot },
}

impl Operation {
    /// Apply this operation to an inventory, returning the successor
    /// state. Pure: the external world is untouched.
    pub fn apply(&self, inv: &Inventory) -> Result<Inventory, ModelError> {
        match self {
            Operation::DeleteOne { side, snapshot } => {
                if !inv.side(*side).has(snapshot) {
                    return Err(ModelError::invalid_op(self, "snapshot not present"));
                }
                let mut out = inv.clone();
                out.side_mut(*side).del(snapshot);
                Ok(out)
            }

            Operation::DeleteRange { side, start, end } => {
                let host = inv.side(*side);
                if !host.has(start) {
                    return Err(ModelError::invalid_op(self, "range start not present"));
                }
                if !host.has(end) {
                    return Err(ModelError::invalid_op(self, "range end not present"));
                }

                // Collect the closed interval [start, end] in host order.
                let mut doomed = Vec::new();
                let mut in_range = false;
                let mut saw_end = false;
                for snap in host.iter() {
                    if snap == start {
                        in_range = true;
                    }
                    if in_range {
                        doomed.push(snap.clone());
                    }
                    if snap == end {
                        saw_end = in_range;
                        break;
                    }
                }
                if !saw_end {
                    return Err(ModelError::invalid_op(self, "range end precedes start"));
                }

                // The filesystem sweeps by timestamp: co-timestamped
                // siblings of every range member disappear too.
                let mut out = inv.clone();
                for snap in &doomed {
                    let dupes: Vec<Snapshot> = out
                        .side(*side)
                        .duplicates_at(snap)
                        .into_iter()
                        .cloned()
                        .collect();
                    for dupe in dupes {
                        out.side_mut(*side).del(&dupe);
                    }
                    out.side_mut(*side).del(snap);
                }
                Ok(out)
            }

            Operation::TransferInitial { snapshot } => {
                if !inv.remote.is_empty() {
                    return Err(ModelError::invalid_op(
                        self,
                        format!(
                            "too late for an initial transfer, remote already has {} snapshots",
                            inv.remote.len()
                        ),
                    ));
                }
                let mut out = inv.clone();
                out.remote.add(snapshot.clone());
                Ok(out)
            }

            Operation::TransferIncremental { start, end } => {
                if inv.remote.is_empty() {
                    return Err(ModelError::invalid_op(
                        self,
                        "cannot send incrementally into an empty remote",
                    ));
                }
                if inv.remote.newest() != Some(start) {
                    return Err(ModelError::invalid_op(self, "start is not the remote tip"));
                }
                if start.created_at >= end.created_at {
                    return Err(ModelError::invalid_op(self, "end does not follow start"));
                }
                if inv.remote.has(end) {
                    return Err(ModelError::invalid_op(self, "remote already has the end"));
                }
                if !inv.local.has(start) {
                    return Err(ModelError::invalid_op(self, "local lacks the start"));
                }
                if !inv.local.has(end) {
                    return Err(ModelError::invalid_op(self, "local lacks the end"));
                }
                let mut out = inv.clone();
                out.remote.add(end.clone());
                Ok(out)
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::DeleteOne { side, snapshot } => {
                write!(
                    f,
                    "destroy {side} {}@{}",
                    snapshot.dataset.path(),
                    snapshot.name
                )
            }
            Operation::DeleteRange { side, start, end } => {
                write!(
                    f,
                    "destroy {side} {}@{}%{}",
                    start.dataset.path(),
                    start.name,
                    end.name
                )
            }
            Operation::TransferInitial { snapshot } => {
                write!(f, "transfer initial {snapshot}")
            }
            Operation::TransferIncremental { start, end } => {
                write!(f, "transfer incremental {start} to {}", end.name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatasetName;

    fn snap(name: &str, at: i64) -> Snapshot {
        Snapshot::new(DatasetName::new("/tank"), name, at)
    }

    fn inv(local: &[Snapshot], remote: &[Snapshot]) -> Inventory {
        Inventory::new(
            local.iter().cloned().collect(),
            remote.iter().cloned().collect(),
        )
    }

    #[test]
    fn delete_one_removes_only_its_target() {
        let before = inv(&[snap("a", 1), snap("b", 2)], &[snap("a", 1)]);
        let op = Operation::DeleteOne {
            side: Side::Local,
            snapshot: snap("a", 1),
        };
        let after = op.apply(&before).expect("apply");
        assert!(!after.local.has(&snap("a", 1)));
        assert!(after.remote.has(&snap("a", 1)));

        // absent target is an error
        assert!(op.apply(&after).is_err());
    }

    #[test]
    fn delete_range_sweeps_the_closed_interval() {
        let before = inv(
            &[snap("a", 1), snap("b", 2), snap("c", 3), snap("d", 4)],
            &[],
        );
        let op = Operation::DeleteRange {
            side: Side::Local,
            start: snap("b", 2),
            end: snap("d", 4),
        };
        let after = op.apply(&before).expect("apply");
        assert_eq!(after.local.len(), 1);
        assert!(after.local.has(&snap("a", 1)));
    }

    #[test]
    fn delete_range_takes_co_timestamped_siblings() {
        let before = inv(
            &[
                snap("a", 1),
                snap("daily-x", 2),
                snap("hourly-x", 2),
                snap("d", 3),
            ],
            &[],
        );
        let op = Operation::DeleteRange {
            side: Side::Local,
            start: snap("daily-x", 2),
            end: snap("d", 3),
        };
        let after = op.apply(&before).expect("apply");
        assert_eq!(after.local.len(), 1);
        assert!(after.local.has(&snap("a", 1)));
        assert!(!after.local.has(&snap("hourly-x", 2)));
    }

    #[test]
    fn delete_range_rejects_bad_endpoints() {
        let before = inv(&[snap("a", 1), snap("b", 2)], &[]);
        let missing = Operation::DeleteRange {
            side: Side::Local,
            start: snap("a", 1),
            end: snap("z", 9),
        };
        assert!(missing.apply(&before).is_err());

        let reversed = Operation::DeleteRange {
            side: Side::Local,
            start: snap("b", 2),
            end: snap("a", 1),
        };
        assert!(reversed.apply(&before).is_err());
    }

    #[test]
    fn transfer_initial_requires_an_empty_remote() {
        let before = inv(&[snap("a", 1)], &[]);
        let op = Operation::TransferInitial {
            snapshot: snap("a", 1),
        };
        let after = op.apply(&before).expect("apply");
        assert!(after.remote.has(&snap("a", 1)));

        assert!(op.apply(&after).is_err());
    }

    #[test]
    fn transfer_incremental_checks_every_precondition() {
        let op = Operation::TransferIncremental {
            start: snap("a", 1),
            end: snap("b", 2),
        };

        // empty remote
        assert!(op.apply(&inv(&[snap("a", 1), snap("b", 2)], &[])).is_err());

        // start not the remote tip
        assert!(
            op.apply(&inv(
                &[snap("a", 1), snap("b", 2), snap("c", 3)],
                &[snap("a", 1), snap("c", 3)],
            ))
            .is_err()
        );

        // end already on remote
        assert!(
            op.apply(&inv(
                &[snap("a", 1), snap("b", 2)],
                &[snap("a", 1), snap("b", 2)],
            ))
            .is_err()
        );

        // local lacks the end
        assert!(op.apply(&inv(&[snap("a", 1)], &[snap("a", 1)])).is_err());

        // the good path
        let after = op
            .apply(&inv(&[snap("a", 1), snap("b", 2)], &[snap("a", 1)]))
            .expect("apply");
        assert!(after.remote.has(&snap("b", 2)));
        assert_eq!(after.remote.len(), 2);
    }

    #[test]
    fn non_ascending_incremental_is_rejected() {
        let op = Operation::TransferIncremental {
            start: snap("b", 2),
            end: snap("a", 2),
        };
        assert!(
            op.apply(&inv(&[snap("a", 2), snap("b", 2)], &[snap("b", 2)]))
                .is_err()
        );
    }
}
