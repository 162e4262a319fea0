//! Core error types for block device convergence.
//!
//! All errors are explicit and typed. Absence of a block device is not an
//! error at lookup time; it only becomes one when a caller asks for a
//! snapshot of an id that no longer exists.

use thiserror::Error;

/// Core error type for bdsync operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The owning machine could not be resolved. Always fatal.
    #[error("machine '{fqdn}' not found")]
    MachineNotFound { fqdn: String },

    /// A block device id did not resolve to a record.
    #[error("block device '{device}' not found on machine '{machine_id}'")]
    BlockDeviceNotFound { machine_id: String, device: String },

    /// The remote service rejected or failed a call.
    #[error("{operation} failed: {reason}")]
    RemoteOperationFailed { operation: String, reason: String },

    /// Mutually exclusive or co-required fields were combined incorrectly.
    #[error("conflicting arguments: {reason}")]
    ValidationConflict { reason: String },

    /// The declaration is malformed or missing required content.
    #[error("invalid declaration: {reason}")]
    InvalidDeclaration { reason: String },
}

impl Error {
    /// Create a machine not found error.
    pub fn machine_not_found(fqdn: impl Into<String>) -> Self {
        Self::MachineNotFound { fqdn: fqdn.into() }
    }

    /// Create a block device not found error.
    pub fn block_device_not_found(machine_id: impl Into<String>, device: impl Into<String>) -> Self {
        Self::BlockDeviceNotFound {
            machine_id: machine_id.into(),
            device: device.into(),
        }
    }

    /// Create a remote operation failure.
    pub fn remote_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteOperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation conflict error.
    pub fn validation_conflict(reason: impl Into<String>) -> Self {
        Self::ValidationConflict {
            reason: reason.into(),
        }
    }

    /// Create an invalid declaration error.
    pub fn invalid_declaration(reason: impl Into<String>) -> Self {
        Self::InvalidDeclaration {
            reason: reason.into(),
        }
    }

    /// Whether this error was raised before any remote call could be issued.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ValidationConflict { .. } | Self::InvalidDeclaration { .. }
        )
    }
}

/// The standard Result type for bdsync operations.
pub type Result<T> = std::result::Result<T, Error>;
