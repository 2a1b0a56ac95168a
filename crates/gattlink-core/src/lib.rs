//! Platform-agnostic BLE GATT client core
//!
//! This crate holds everything about talking to a GATT server that does not
//! depend on the operating system's Bluetooth stack. A backend implements
//! [`BlePlatform`] and reports results through a [`PeripheralListener`]; the
//! core turns that into a connection state machine and one serialized
//! operation queue per characteristic.
//!
//! ## Architecture
//!
//! - [`cache`] - Persistent hardware address to platform identifier map
//! - [`scan`] - Scan sessions and advertisement results
//! - [`connection`] - Connection lifecycle and characteristic lookup
//! - [`characteristic`] - Per-characteristic reads, writes and notifications
//! - [`engine`] - Operation queue shared by every characteristic
//! - [`platform`] - Capabilities a backend provides
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gattlink_core::{AddressCache, BlePlatform, Connection, GattConfig};
//!
//! # async fn example(platform: Arc<dyn BlePlatform>) -> gattlink_core::Result<()> {
//! let config = GattConfig::new();
//! let cache = AddressCache::from_config(&config)?;
//!
//! let connection = Connection::open(platform, &cache, "E8:C9:8F:52:7B:07", &config)?;
//! connection.connect().await?;
//!
//! if let Some(battery) = connection.find_characteristic("2a19")? {
//!     let level = battery.read().await?;
//!     println!("battery: {:?}", level);
//! }
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod cache;
pub mod characteristic;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod identifiers;
pub mod platform;
pub mod scan;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use cache::{AddressCache, DeviceRecord};
pub use characteristic::{Characteristic, NotificationHandler};
pub use config::GattConfig;
pub use connection::{Connection, ConnectionState, DisconnectHandler};
pub use engine::{OperationKind, PendingOperation, ReadHandler, StatusHandler};
pub use error::{GattError, Result};
pub use identifiers::{from_short, normalize_address, parse_uuid};
pub use platform::{
    BlePlatform, CharacteristicHandle, CharacteristicInfo, PeripheralHandle, PeripheralListener,
    PlatformError, ScanSink, ServiceInfo,
};
pub use scan::{ScanHandler, ScanMode, ScanOptions, ScanResult, ScanSession};
