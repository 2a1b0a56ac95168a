//! Advertisement decoding and peripheral identity

use std::fmt;

use btleplug::api::{BDAddr, PeripheralProperties};
use gattlink_core::ScanResult;

/// Platform identifier string for a btleplug peripheral
///
/// This is the value stored in the address cache, so it must be stable for
/// a device across runs and crate upgrades. `PeripheralId`'s `Display` form
/// is the platform's own device identifier; its `Debug` form carries Rust
/// type names.
pub fn peripheral_key<I: fmt::Display + ?Sized>(id: &I) -> String {
    id.to_string()
}

/// Build a [`ScanResult`] from the properties btleplug has accumulated
///
/// CoreBluetooth never reports the hardware address and leaves it zeroed;
/// such results carry no address.
pub fn scan_result_from(identifier: String, properties: &PeripheralProperties) -> ScanResult {
    let mut result = ScanResult::new(identifier, properties.rssi.unwrap_or_default());

    if properties.address != BDAddr::default() {
        result = result.with_address(properties.address.to_string().to_uppercase());
    }
    if let Some(name) = &properties.local_name {
        result = result.with_name(name.clone());
    }
    for uuid in &properties.services {
        result = result.with_service(*uuid);
    }
    for (company_id, data) in &properties.manufacturer_data {
        result = result.with_manufacturer_data(*company_id, data.clone());
    }
    result
}
