//! gattlink CLI configuration
//!
//! Settings come from an optional TOML file, then command-line overrides:
//!
//! ```toml
//! scan_duration_secs = 10
//!
//! [gatt]
//! cache_dir = "/home/me/.gattlink"
//!
//! [gatt.scan]
//! radio_selector = "hci1"
//! mode = "active"
//! ```

use std::path::Path;

use gattlink_core::GattConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

/// Default scan length when neither the file nor `--duration` sets one
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

// ----------------------------------------------------------------------------
// CLI Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// GATT client settings
    pub gatt: GattConfig,
    /// How long `scan` runs
    pub scan_duration_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            gatt: GattConfig::default(),
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
        }
    }
}

impl CliConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&document)
    }

    pub fn from_toml(document: &str) -> Result<Self> {
        let config: CliConfig = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `--cache-dir` and `--adapter`
    pub fn with_overrides(mut self, cache_dir: Option<&str>, adapter: Option<&str>) -> Self {
        if let Some(dir) = cache_dir {
            self.gatt.cache_dir = dir.into();
        }
        if let Some(adapter) = adapter {
            self.gatt.scan.radio_selector = Some(adapter.to_string());
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.gatt.cache_file_name.is_empty() {
            return Err(CliError::Config("cache_file_name must not be empty".to_string()));
        }
        if self.scan_duration_secs == 0 {
            return Err(CliError::Config("scan_duration_secs must be positive".to_string()));
        }
        Ok(())
    }
}
