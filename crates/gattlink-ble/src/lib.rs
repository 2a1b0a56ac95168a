//! btleplug backend for the gattlink GATT client core
//!
//! This crate implements [`gattlink_core::BlePlatform`] on top of btleplug, so
//! a [`gattlink_core::Connection`] can drive a real peripheral on Linux
//! (BlueZ), macOS (CoreBluetooth) and Windows (WinRT).
//!
//! ## Architecture
//!
//! - [`platform`] - The platform capability and its background tasks
//! - [`discovery`] - Advertisement decoding and peripheral identifiers
//! - `links` - Decides which connect and disconnect signals reach the core
//! - [`error`] - Adapter bring-up errors
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gattlink_ble::BtleplugPlatform;
//! use gattlink_core::{GattConfig, ScanOptions, ScanSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GattConfig::new();
//! let platform = Arc::new(BtleplugPlatform::new(&config).await?);
//!
//! let scanner = ScanSession::new(platform);
//! scanner.set_handler(|result| println!("{} {}", result.identifier(), result.rssi()));
//! scanner.start(&ScanOptions::new())?;
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod error;
mod events;
mod handles;
mod links;
pub mod platform;

// Public API exports
pub use discovery::{peripheral_key, scan_result_from};
pub use error::BackendError;
pub use platform::BtleplugPlatform;
