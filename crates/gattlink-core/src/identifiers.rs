//! Canonical forms for hardware addresses and GATT UUIDs
//!
//! Every address lookup and every UUID comparison in the crate goes through
//! these two functions, so `aa-bb-cc-dd-ee-ff` and `AA:BB:CC:DD:EE:FF` name the
//! same device and `"2a19"` names the same characteristic as
//! `"00002A19-0000-1000-8000-00805F9B34FB"`.

use uuid::Uuid;

use crate::error::{GattError, Result};

/// Bluetooth base UUID used to expand 16-bit and 32-bit short forms
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb);

/// Normalize a hardware address to `AA:BB:CC:DD:EE:FF`
///
/// Accepts any case with `:` or `-` separators, or twelve bare hex digits.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    let digits: String = trimmed
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();

    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GattError::InvalidAddress(address.to_string()));
    }

    // Separators, when present, must sit on octet boundaries
    if trimmed.len() != 12 {
        let octets: Vec<&str> = trimmed.split([':', '-']).collect();
        if octets.len() != 6 || octets.iter().any(|o| o.len() != 2) {
            return Err(GattError::InvalidAddress(address.to_string()));
        }
    }

    let upper = digits.to_ascii_uppercase();
    let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Ok(octets.join(":"))
}

/// Parse a UUID string in any of the forms BLE stacks print
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if (short.len() == 4 || short.len() == 8) && short.chars().all(|c| c.is_ascii_hexdigit()) {
        let alias = u32::from_str_radix(short, 16)
            .map_err(|_| GattError::InvalidUuid(value.to_string()))?;
        return Ok(from_short(alias));
    }

    Uuid::parse_str(trimmed).map_err(|_| GattError::InvalidUuid(value.to_string()))
}

/// Expand a 16/32-bit assigned number onto the base UUID
pub fn from_short(alias: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((alias as u128) << 96))
}
