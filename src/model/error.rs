//! Reconciliation-core errors.

use thiserror::Error;

/// Failures raised by the pure core: plan synthesis, operation
/// preconditions, and plan validation.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ModelError {
    /// The remote holds snapshots but none are shared with local, so no
    /// incremental base exists. History has diverged; nothing automatic
    /// is safe.
    #[error("remote has snapshots but shares none with local")]
    NoSharedSnapshot,

    #[error("local does not have transfer base {base}")]
    MissingTransferBase { base: String },

    #[error("invalid operation `{op}`: {reason}")]
    InvalidOperation { op: String, reason: String },

    /// The synthesized plan does not reproduce the target inventory.
    #[error("applying plan does not produce the target state:\n{diff}")]
    TargetMismatch { diff: String },

    #[error("no such dataset `{name}`")]
    UnknownDataset { name: String },

    #[error("dataset `{name}` has no plan")]
    NoPlan { name: String },
}

impl ModelError {
    pub(crate) fn invalid_op(op: &impl std::fmt::Display, reason: impl Into<String>) -> Self {
        ModelError::InvalidOperation {
            op: op.to_string(),
            reason: reason.into(),
        }
    }
}
