//! Error types for GATT client operations

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::connection::ConnectionState;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by the GATT client core
///
/// Operation failures are delivered through the operation's own completion
/// handler; only initialization errors (unknown address, unreadable cache) are
/// returned directly from constructors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Device with address {address} is not known, scan for devices first")]
    DeviceNotFound { address: String },

    #[error("Failed to connect to {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("Connection lost while the operation was pending")]
    ConnectionLost,

    #[error("Failed to set notifications for {characteristic}")]
    Notification { characteristic: Uuid },

    #[error("Address cache {} is unusable: {reason}", path.display())]
    Storage { path: PathBuf, reason: String },

    #[error("Invalid hardware address: {0}")]
    InvalidAddress(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Peripheral not connected")]
    NotConnected,

    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("Operation on {characteristic} failed: {reason}")]
    Operation { characteristic: Uuid, reason: String },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("Scan failed: {0}")]
    Scan(String),
}

impl GattError {
    /// True for the "normal miss" cases callers are expected to check for
    pub fn is_not_found(&self) -> bool {
        matches!(self, GattError::DeviceNotFound { .. })
    }
}

/// Result type for GATT client operations
pub type Result<T> = std::result::Result<T, GattError>;
