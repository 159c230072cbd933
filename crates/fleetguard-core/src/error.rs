//! Error taxonomy (spec.md §7).

use thiserror::Error;

/// Typed cluster driver faults (§4.1 Failure model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DriverFault {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("invalid")]
    Invalid,
    #[error("cluster unavailable")]
    ClusterUnavailable,
    #[error("cluster timeout")]
    ClusterTimeout,
}

impl DriverFault {
    /// Transient faults are retried internally by the driver (§4.1, §7).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverFault::ClusterUnavailable | DriverFault::ClusterTimeout
        )
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("driver fault: {fault} ({message})")]
    Driver {
        fault: DriverFault,
        message: String,
    },

    #[error("policy rejected: {0} violation(s)")]
    PolicyRejected(usize),

    #[error("safety breach: {0}")]
    SafetyBreach(String),

    #[error("already active: {0}")]
    AlreadyActive(String),

    #[error("already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn driver(fault: DriverFault, message: impl Into<String>) -> Self {
        Error::Driver {
            fault,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
