#![forbid(unsafe_code)]

pub mod atom;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logs;
pub mod model;
pub mod telemetry;
pub mod zfs;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the reconciliation core at the crate root for convenience.
pub use crate::model::{
    Dataset, DatasetName, Inventory, Model, ModelError, Operation, Plan, PlanStep, Policy, Side,
    Snapshot, SnapshotSet, StepStatus, plan_transition, target_inventory, validate_plan,
};
