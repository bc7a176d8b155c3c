//! Per-dataset snapshot inventory: what exists on each side.

use std::fmt::Write as _;

use super::set::SnapshotSet;
use super::snapshot::Side;

/// The pure logical state of one dataset: which snapshots exist where.
/// Carries no storage metrics; planning and target synthesis read only
/// this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub local: SnapshotSet,
    pub remote: SnapshotSet,
}

impl Inventory {
    pub fn new(local: SnapshotSet, remote: SnapshotSet) -> Self {
        Inventory { local, remote }
    }

    pub fn side(&self, side: Side) -> &SnapshotSet {
        match side {
            Side::Local => &self.local,
            Side::Remote => &self.remote,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SnapshotSet {
        match side {
            Side::Local => &mut self.local,
            Side::Remote => &mut self.remote,
        }
    }

    /// Stable textual diff for debugging and validator output.
    pub fn diff(&self, other: &Inventory) -> String {
        if self == other {
            return "<no diff>".to_string();
        }
        let mut out = String::new();
        let _ = writeln!(out, "  local diff");
        out.push_str(&self.local.diff("    ", &other.local));
        let _ = writeln!(out, "  remote diff");
        out.push_str(&self.remote.diff("    ", &other.remote));
        out
    }
}
