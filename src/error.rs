//! Crate-level error surface.
//!
//! Not a "god error": a thin wrapper over the capability errors
//! (model, driver, config), plus the handful of process-level failures
//! that belong to no capability.

use thiserror::Error;

use crate::config::ConfigError;
use crate::model::ModelError;
use crate::zfs::DriverError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The cancellation signal was received mid-operation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("backupd must run as root (effective uid {euid})")]
    NotRoot { euid: u32 },

    /// A control request to the running daemon failed.
    #[error("daemon request failed: {reason}")]
    DaemonRequest { reason: String },
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Driver(e) => e.transience(),
            // Model and config errors are pure domain/input failures.
            _ => Transience::Permanent,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
