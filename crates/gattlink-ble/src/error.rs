//! Error types for the btleplug backend

use gattlink_core::GattError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while bringing up the btleplug backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to create BLE manager: {0}")]
    Manager(String),

    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("No BLE adapter matches {selector:?}")]
    NoMatchingAdapter { selector: String },

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("No tokio runtime is running")]
    NoRuntime,
}

impl From<BackendError> for GattError {
    fn from(err: BackendError) -> Self {
        GattError::Scan(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
