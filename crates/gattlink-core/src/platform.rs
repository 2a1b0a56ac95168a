//! Capabilities the core consumes from an operating-system BLE stack
//!
//! A platform exposes non-blocking primitives. Every primitive that has a
//! result reports it later through the [`PeripheralListener`] registered for
//! the peripheral, on the platform's single event-dispatch thread or task.

use std::fmt;
use std::sync::{Arc, Weak};

use thiserror::Error;
use uuid::Uuid;

use crate::error::Result;
use crate::scan::{ScanOptions, ScanResult};

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Opaque handle to a resolved peripheral
///
/// Created by the platform from a platform identifier. Deliberately not
/// `Clone`: a handle belongs to the one `Connection` that resolved it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PeripheralHandle {
    identifier: String,
}

impl PeripheralHandle {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    /// The platform identifier this handle was resolved from
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Platform-assigned identity of one characteristic instance
///
/// Every completion the platform delivers carries this handle; it is the key
/// used to route the completion back to the waiting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicHandle(pub u64);

impl fmt::Display for CharacteristicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A characteristic as enumerated by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub handle: CharacteristicHandle,
    pub uuid: Uuid,
}

/// A discovered service and its characteristics, in enumeration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Failure reported by a platform primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

// ----------------------------------------------------------------------------
// Callback Interface
// ----------------------------------------------------------------------------

/// Receiver for the asynchronous signals of one peripheral
pub trait PeripheralListener: Send + Sync {
    /// The connect primitive finished
    fn on_connect(&self, result: std::result::Result<(), PlatformError>);

    /// The link went down, whether requested or not
    fn on_disconnect(&self);

    /// A read primitive finished
    fn on_read(
        &self,
        characteristic: CharacteristicHandle,
        result: std::result::Result<Vec<u8>, PlatformError>,
    );

    /// An acknowledged write finished
    fn on_write(
        &self,
        characteristic: CharacteristicHandle,
        result: std::result::Result<(), PlatformError>,
    );

    /// Unsolicited value-changed event
    fn on_notify(&self, characteristic: CharacteristicHandle, value: Vec<u8>);

    /// The enable-notifications primitive finished
    fn on_notification_state(&self, characteristic: CharacteristicHandle, success: bool);
}

/// Callback receiving scan results from the platform
pub type ScanSink = Arc<dyn Fn(ScanResult) + Send + Sync>;

// ----------------------------------------------------------------------------
// Platform Capability
// ----------------------------------------------------------------------------

/// Operating-system BLE stack as seen by the core
///
/// Implementations must not invoke listener methods while holding locks that
/// the listener could need, and must never block the caller.
pub trait BlePlatform: Send + Sync {
    /// Begin scanning, delivering every advertisement to `sink`
    fn start_scan(&self, options: &ScanOptions, sink: ScanSink) -> Result<()>;

    /// Halt scanning and release the scanner
    fn stop_scan(&self);

    /// Map a platform identifier to a live peripheral, if reachable
    fn resolve_peripheral(&self, identifier: &str) -> Option<PeripheralHandle>;

    /// Route signals for `peripheral` to `listener`, replacing any previous one
    fn register_listener(&self, peripheral: &PeripheralHandle, listener: Weak<dyn PeripheralListener>);

    /// Stop routing signals for `peripheral`
    fn unregister_listener(&self, peripheral: &PeripheralHandle);

    fn connect(&self, peripheral: &PeripheralHandle);

    fn disconnect(&self, peripheral: &PeripheralHandle);

    /// Services discovered on a connected peripheral, in enumeration order
    fn services(&self, peripheral: &PeripheralHandle) -> Vec<ServiceInfo>;

    fn read(&self, peripheral: &PeripheralHandle, characteristic: CharacteristicHandle);

    fn write(&self, peripheral: &PeripheralHandle, characteristic: CharacteristicHandle, value: &[u8]);

    /// Unacknowledged write; there is no completion signal
    fn write_without_response(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: CharacteristicHandle,
        value: &[u8],
    );

    /// Toggle the subscription; only enabling reports back
    fn set_notify(&self, peripheral: &PeripheralHandle, characteristic: CharacteristicHandle, enabled: bool);
}
