//! The reconciliation core: pure data and algorithms, no I/O.
//!
//! Provides:
//! - `Snapshot` / `SnapshotSet` - the ordered snapshot collection
//! - `Inventory` - local+remote pair for one dataset
//! - `target_inventory` - retention policies -> desired state
//! - `plan_transition` / `validate_plan` - desired state -> operations
//! - `Model` - process-wide dataset map

mod dataset;
mod error;
mod inventory;
mod metrics;
mod operation;
mod plan;
mod policy;
mod set;
mod snapshot;
mod target;

pub use dataset::{Dataset, Model};
pub use error::ModelError;
pub use inventory::Inventory;
pub use metrics::{DatasetSize, StorageMetrics, humanize_bytes};
pub use operation::Operation;
pub use plan::{Plan, PlanStep, StepStatus, plan_transition, validate_plan};
pub use policy::Policy;
pub use set::SnapshotSet;
pub use snapshot::{DatasetName, Side, Snapshot};
pub use target::target_inventory;
