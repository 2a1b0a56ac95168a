//! Characteristic handle allocation
//!
//! btleplug identifies a characteristic by value (service and characteristic
//! UUID), while the core routes completions by an integer handle. The table
//! hands out one stable handle per characteristic per peripheral.

use std::collections::HashMap;

use gattlink_core::CharacteristicHandle;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CharacteristicKey {
    peripheral: String,
    service: Uuid,
    characteristic: Uuid,
}

/// Stable handles for the characteristics of every known peripheral
#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    next: u64,
    by_key: HashMap<CharacteristicKey, CharacteristicHandle>,
    entries: HashMap<CharacteristicHandle, (String, T)>,
    // Notifications only carry the characteristic UUID
    notify_routes: HashMap<(String, Uuid), CharacteristicHandle>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            next: 1,
            by_key: HashMap::new(),
            entries: HashMap::new(),
            notify_routes: HashMap::new(),
        }
    }
}

impl<T> HandleTable<T> {
    /// Handle for a characteristic, allocating one on first sight
    pub fn assign(
        &mut self,
        peripheral: &str,
        service: Uuid,
        characteristic: Uuid,
        value: T,
    ) -> CharacteristicHandle {
        let key = CharacteristicKey {
            peripheral: peripheral.to_string(),
            service,
            characteristic,
        };
        if let Some(handle) = self.by_key.get(&key) {
            return *handle;
        }

        let handle = CharacteristicHandle(self.next);
        self.next += 1;
        self.by_key.insert(key, handle);
        self.entries.insert(handle, (peripheral.to_string(), value));
        self.notify_routes
            .entry((peripheral.to_string(), characteristic))
            .or_insert(handle);
        handle
    }

    /// Peripheral and stored value behind `handle`
    pub fn get(&self, handle: CharacteristicHandle) -> Option<&(String, T)> {
        self.entries.get(&handle)
    }

    /// Handle a value-changed event for `characteristic` is routed to
    pub fn notify_route(&self, peripheral: &str, characteristic: Uuid) -> Option<CharacteristicHandle> {
        self.notify_routes
            .get(&(peripheral.to_string(), characteristic))
            .copied()
    }
}
