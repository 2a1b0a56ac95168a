//! Device discovery
//!
//! [`ScanSession`] wraps the platform scanner. It owns a single handler slot;
//! the last registered handler receives every [`ScanResult`] until `stop`.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::identifiers::parse_uuid;
use crate::platform::{BlePlatform, ScanSink};

// ----------------------------------------------------------------------------
// Scan Options
// ----------------------------------------------------------------------------

/// Whether the scanner sends scan requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Passive,
    #[default]
    Active,
}

/// Scanner settings
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Local adapter to scan with (Linux only; matched against the adapter's
    /// name or address)
    pub radio_selector: Option<String>,
    pub mode: ScanMode,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_radio(mut self, selector: impl Into<String>) -> Self {
        self.radio_selector = Some(selector.into());
        self
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }
}

// ----------------------------------------------------------------------------
// Scan Result
// ----------------------------------------------------------------------------

/// One advertisement as seen by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    identifier: String,
    address: Option<String>,
    name: Option<String>,
    rssi: i16,
    service_uuids: BTreeSet<Uuid>,
    manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl ScanResult {
    pub fn new(identifier: impl Into<String>, rssi: i16) -> Self {
        Self {
            identifier: identifier.into(),
            address: None,
            name: None,
            rssi,
            service_uuids: BTreeSet::new(),
            manufacturer_data: HashMap::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_service(mut self, uuid: Uuid) -> Self {
        self.service_uuids.insert(uuid);
        self
    }

    pub fn with_manufacturer_data(mut self, company_id: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data.insert(company_id, data);
        self
    }

    /// Platform identifier of the advertiser
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Hardware address, when the platform exposes it
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Advertised local name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Signal strength in dBm
    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    pub fn service_uuids(&self) -> &BTreeSet<Uuid> {
        &self.service_uuids
    }

    /// True if the device advertises `uuid` (any UUID string form)
    pub fn has_service_uuid(&self, uuid: &str) -> bool {
        parse_uuid(uuid)
            .map(|uuid| self.service_uuids.contains(&uuid))
            .unwrap_or(false)
    }

    /// Manufacturer-specific data for `company_id`
    pub fn manufacturer_data(&self, company_id: u16) -> Option<&[u8]> {
        self.manufacturer_data.get(&company_id).map(Vec::as_slice)
    }

    /// Manufacturer-specific data for every company id present
    pub fn all_manufacturer_data(&self) -> &HashMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }
}

// ----------------------------------------------------------------------------
// Scan Session
// ----------------------------------------------------------------------------

/// Handler receiving scan results
pub type ScanHandler = Arc<dyn Fn(ScanResult) + Send + Sync>;

/// Scanner owned by the application and passed by reference
pub struct ScanSession {
    platform: Arc<dyn BlePlatform>,
    handler: Arc<Mutex<Option<ScanHandler>>>,
    scanning: AtomicBool,
}

impl ScanSession {
    pub fn new(platform: Arc<dyn BlePlatform>) -> Self {
        Self {
            platform,
            handler: Arc::new(Mutex::new(None)),
            scanning: AtomicBool::new(false),
        }
    }

    /// Register the result handler; replaces any previous one, even mid-scan
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(ScanResult) + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// Start scanning; restarts with the new options if already scanning
    pub fn start(&self, options: &ScanOptions) -> Result<()> {
        if self.scanning.swap(false, Ordering::SeqCst) {
            debug!("Restarting scan");
            self.platform.stop_scan();
        }

        let slot = self.handler.clone();
        let sink: ScanSink = Arc::new(move |result: ScanResult| {
            let handler = slot.lock().clone();
            if let Some(handler) = handler {
                handler(result);
            }
        });

        // Marked before starting so a handler may stop the scan from its first result
        self.scanning.store(true, Ordering::SeqCst);
        if let Err(e) = self.platform.start_scan(options, sink) {
            self.scanning.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            "Started {:?} BLE scan{}",
            options.mode,
            options
                .radio_selector
                .as_ref()
                .map(|r| format!(" on {}", r))
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Stop scanning; a no-op when not scanning
    pub fn stop(&self) {
        if self.scanning.swap(false, Ordering::SeqCst) {
            self.platform.stop_scan();
            info!("Stopped BLE scan");
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.stop();
    }
}
