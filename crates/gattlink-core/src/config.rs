//! GATT client configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::scan::ScanOptions;

/// Directory name used under the home directory when no cache dir is given
pub const DEFAULT_CACHE_DIR_NAME: &str = ".gattlink";

/// File holding the address → platform identifier mapping
pub const DEFAULT_CACHE_FILE_NAME: &str = "known_devices.json";

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the GATT client
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GattConfig {
    /// Directory holding the known-devices document
    pub cache_dir: PathBuf,
    /// Name of the known-devices document inside `cache_dir`
    pub cache_file_name: String,
    /// Deadline applied by the async wrappers to GATT operations
    pub operation_timeout: Option<Duration>,
    /// Deadline applied by the async wrapper to connection attempts
    pub connect_timeout: Option<Duration>,
    /// Default scan settings
    pub scan: ScanOptions,
}

impl Default for GattConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: home.join(DEFAULT_CACHE_DIR_NAME),
            cache_file_name: DEFAULT_CACHE_FILE_NAME.to_string(),
            operation_timeout: None,
            connect_timeout: None,
            scan: ScanOptions::default(),
        }
    }
}

impl GattConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the cache file name
    pub fn with_cache_file_name(mut self, name: impl Into<String>) -> Self {
        self.cache_file_name = name.into();
        self
    }

    /// Set the per-operation deadline used by the async wrappers
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Set the connect deadline used by the async wrapper
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set default scan settings
    pub fn with_scan_options(mut self, options: ScanOptions) -> Self {
        self.scan = options;
        self
    }

    /// Full path of the known-devices document
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(&self.cache_file_name)
    }
}
