//! Persistent mapping from hardware address to platform identifier
//!
//! Some platforms (CoreBluetooth in particular) never expose a peripheral's
//! MAC address; a device can only be reached through the opaque identifier the
//! OS handed out during a scan. The cache remembers that pairing so a caller
//! can connect by address later.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::GattConfig;
use crate::error::{GattError, Result};
use crate::identifiers::normalize_address;

/// A remembered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Canonical `AA:BB:CC:DD:EE:FF` address
    pub hardware_address: String,
    /// Opaque identifier understood by the platform
    pub platform_identifier: String,
}

/// JSON-backed address cache, loaded once and flushed on every insert
#[derive(Debug)]
pub struct AddressCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl AddressCache {
    /// Open the cache at the location named by `config`
    pub fn from_config(config: &GattConfig) -> Result<Self> {
        Self::open(config.cache_path())
    }

    /// Open the cache document at `path`, creating its directory if needed
    ///
    /// A missing document is an empty cache. An unreadable or corrupt document
    /// is a `Storage` error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| storage_error(&path, e))?;
            }
        }

        if !path.exists() {
            debug!("No address cache at {}, starting empty", path.display());
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let document = std::fs::read_to_string(&path).map_err(|e| storage_error(&path, e))?;
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&document).map_err(|e| storage_error(&path, e))?;

        let mut entries = BTreeMap::new();
        for (address, identifier) in raw {
            match normalize_address(&address) {
                Ok(canonical) => {
                    entries.insert(canonical, identifier);
                }
                Err(_) => warn!("Skipping malformed address {:?} in {}", address, path.display()),
            }
        }

        info!("Loaded {} known devices from {}", entries.len(), path.display());
        Ok(Self { path, entries })
    }

    /// Location of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the record for `address`; `Ok(None)` is a normal miss
    pub fn lookup(&self, address: &str) -> Result<Option<DeviceRecord>> {
        let canonical = normalize_address(address)?;
        Ok(self.entries.get(&canonical).map(|identifier| DeviceRecord {
            hardware_address: canonical.clone(),
            platform_identifier: identifier.clone(),
        }))
    }

    /// Like [`lookup`](Self::lookup) but an unknown address is an error
    pub fn require(&self, address: &str) -> Result<DeviceRecord> {
        let canonical = normalize_address(address)?;
        match self.lookup(&canonical)? {
            Some(record) => Ok(record),
            None => Err(GattError::DeviceNotFound { address: canonical }),
        }
    }

    /// Remember `address` → `platform_identifier` and flush to disk
    pub fn insert(&mut self, address: &str, platform_identifier: impl Into<String>) -> Result<()> {
        let canonical = normalize_address(address)?;
        let identifier = platform_identifier.into();
        debug!("Caching {} -> {}", canonical, identifier);
        self.entries.insert(canonical, identifier);
        self.flush()
    }

    /// Forget `address`; returns whether a record existed
    pub fn remove(&mut self, address: &str) -> Result<bool> {
        let canonical = normalize_address(address)?;
        if self.entries.remove(&canonical).is_none() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// All records, ordered by address
    pub fn records(&self) -> impl Iterator<Item = DeviceRecord> + '_ {
        self.entries.iter().map(|(address, identifier)| DeviceRecord {
            hardware_address: address.clone(),
            platform_identifier: identifier.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush(&self) -> Result<()> {
        let document = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| storage_error(&self.path, e))?;
        std::fs::write(&self.path, document).map_err(|e| storage_error(&self.path, e))?;
        debug!("Flushed {} known devices to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}

fn storage_error(path: &Path, err: impl std::fmt::Display) -> GattError {
    GattError::Storage {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
