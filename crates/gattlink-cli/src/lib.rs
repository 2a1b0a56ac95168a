//! gattlink CLI library
//!
//! Command-line front end for scanning, remembering and talking to BLE GATT
//! peripherals through `gattlink-core` and the btleplug backend.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::CliConfig;
pub use error::{CliError, Result};
