//! Scripted platform for driving the GATT core deterministically
//!
//! [`MockPlatform`] records every primitive the core dispatches and lets a
//! test fire the listener callbacks a real BLE stack would deliver later.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use gattlink_core::{
    from_short, BlePlatform, CharacteristicHandle, CharacteristicInfo, DeviceRecord, GattConfig,
    GattError, PeripheralHandle, PeripheralListener, PlatformError, ScanOptions, ScanResult,
    ScanSink, ServiceInfo,
};
use parking_lot::Mutex;
use uuid::Uuid;

pub const DEVICE_ADDRESS: &str = "E8:C9:8F:52:7B:07";
pub const DEVICE_IDENTIFIER: &str = "platform-id-7b07";

pub const BATTERY_SERVICE: u32 = 0x180f;
pub const BATTERY_LEVEL: u32 = 0x2a19;
pub const BATTERY_HANDLE: CharacteristicHandle = CharacteristicHandle(1);

pub const DEVICE_INFO_SERVICE: u32 = 0x180a;
pub const MODEL_NUMBER: u32 = 0x2a24;
pub const MODEL_HANDLE: CharacteristicHandle = CharacteristicHandle(2);

// ----------------------------------------------------------------------------
// Recorded Calls
// ----------------------------------------------------------------------------

/// A primitive the core asked the platform to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan(ScanOptions),
    StopScan,
    Connect(String),
    Disconnect(String),
    Read(CharacteristicHandle),
    Write(CharacteristicHandle, Vec<u8>),
    WriteWithoutResponse(CharacteristicHandle, Vec<u8>),
    SetNotify(CharacteristicHandle, bool),
    Unregister(String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    reachable: HashSet<String>,
    services: Vec<ServiceInfo>,
    listener: Option<Weak<dyn PeripheralListener>>,
    scan_sink: Option<ScanSink>,
    scan_failure: Option<String>,
}

// ----------------------------------------------------------------------------
// Mock Platform
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    /// A platform that can reach the test device, which exposes a battery
    /// service and a device information service
    pub fn new() -> Arc<Self> {
        let platform = Arc::new(Self::default());
        platform.set_reachable(DEVICE_IDENTIFIER);
        platform.set_services(vec![
            ServiceInfo {
                uuid: from_short(BATTERY_SERVICE),
                characteristics: vec![CharacteristicInfo {
                    handle: BATTERY_HANDLE,
                    uuid: from_short(BATTERY_LEVEL),
                }],
            },
            ServiceInfo {
                uuid: from_short(DEVICE_INFO_SERVICE),
                characteristics: vec![CharacteristicInfo {
                    handle: MODEL_HANDLE,
                    uuid: from_short(MODEL_NUMBER),
                }],
            },
        ]);
        platform
    }

    pub fn set_reachable(&self, identifier: &str) {
        self.state.lock().reachable.insert(identifier.to_string());
    }

    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        self.state.lock().services = services;
    }

    pub fn fail_next_scan(&self, reason: &str) {
        self.state.lock().scan_failure = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn has_listener(&self) -> bool {
        self.listener().is_some()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn listener(&self) -> Option<Arc<dyn PeripheralListener>> {
        let weak = self.state.lock().listener.clone();
        weak.and_then(|listener| listener.upgrade())
    }

    // ------------------------------------------------------------------------
    // Firing callbacks
    // ------------------------------------------------------------------------

    pub fn fire_connect(&self, result: Result<(), &str>) {
        if let Some(listener) = self.listener() {
            listener.on_connect(result.map_err(PlatformError::new));
        }
    }

    pub fn fire_disconnect(&self) {
        if let Some(listener) = self.listener() {
            listener.on_disconnect();
        }
    }

    pub fn fire_read(&self, handle: CharacteristicHandle, result: Result<Vec<u8>, &str>) {
        if let Some(listener) = self.listener() {
            listener.on_read(handle, result.map_err(PlatformError::new));
        }
    }

    pub fn fire_write(&self, handle: CharacteristicHandle, result: Result<(), &str>) {
        if let Some(listener) = self.listener() {
            listener.on_write(handle, result.map_err(PlatformError::new));
        }
    }

    pub fn fire_notify(&self, handle: CharacteristicHandle, value: &[u8]) {
        if let Some(listener) = self.listener() {
            listener.on_notify(handle, value.to_vec());
        }
    }

    pub fn fire_notification_state(&self, handle: CharacteristicHandle, success: bool) {
        if let Some(listener) = self.listener() {
            listener.on_notification_state(handle, success);
        }
    }

    pub fn fire_scan_result(&self, result: ScanResult) {
        let sink = self.state.lock().scan_sink.clone();
        if let Some(sink) = sink {
            sink(result);
        }
    }
}

impl BlePlatform for MockPlatform {
    fn start_scan(&self, options: &ScanOptions, sink: ScanSink) -> gattlink_core::Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = state.scan_failure.take() {
            return Err(GattError::Scan(reason));
        }
        state.calls.push(Call::StartScan(options.clone()));
        state.scan_sink = Some(sink);
        Ok(())
    }

    fn stop_scan(&self) {
        let mut state = self.state.lock();
        state.calls.push(Call::StopScan);
        state.scan_sink = None;
    }

    fn resolve_peripheral(&self, identifier: &str) -> Option<PeripheralHandle> {
        self.state
            .lock()
            .reachable
            .contains(identifier)
            .then(|| PeripheralHandle::new(identifier))
    }

    fn register_listener(&self, _peripheral: &PeripheralHandle, listener: Weak<dyn PeripheralListener>) {
        self.state.lock().listener = Some(listener);
    }

    fn unregister_listener(&self, peripheral: &PeripheralHandle) {
        let mut state = self.state.lock();
        state.listener = None;
        state.calls.push(Call::Unregister(peripheral.identifier().to_string()));
    }

    fn connect(&self, peripheral: &PeripheralHandle) {
        self.record(Call::Connect(peripheral.identifier().to_string()));
    }

    fn disconnect(&self, peripheral: &PeripheralHandle) {
        self.record(Call::Disconnect(peripheral.identifier().to_string()));
    }

    fn services(&self, _peripheral: &PeripheralHandle) -> Vec<ServiceInfo> {
        self.state.lock().services.clone()
    }

    fn read(&self, _peripheral: &PeripheralHandle, characteristic: CharacteristicHandle) {
        self.record(Call::Read(characteristic));
    }

    fn write(&self, _peripheral: &PeripheralHandle, characteristic: CharacteristicHandle, value: &[u8]) {
        self.record(Call::Write(characteristic, value.to_vec()));
    }

    fn write_without_response(
        &self,
        _peripheral: &PeripheralHandle,
        characteristic: CharacteristicHandle,
        value: &[u8],
    ) {
        self.record(Call::WriteWithoutResponse(characteristic, value.to_vec()));
    }

    fn set_notify(&self, _peripheral: &PeripheralHandle, characteristic: CharacteristicHandle, enabled: bool) {
        self.record(Call::SetNotify(characteristic, enabled));
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

pub fn device_record() -> DeviceRecord {
    DeviceRecord {
        hardware_address: DEVICE_ADDRESS.to_string(),
        platform_identifier: DEVICE_IDENTIFIER.to_string(),
    }
}

pub fn battery_uuid() -> Uuid {
    from_short(BATTERY_LEVEL)
}

pub fn test_config() -> GattConfig {
    GattConfig::new()
}

/// Shared log of handler outcomes, in invocation order
#[derive(Clone, Default)]
pub struct Outcomes(Arc<Mutex<Vec<String>>>);

impl Outcomes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn status(&self, tag: &'static str) -> impl FnOnce(gattlink_core::Result<()>) + Send + 'static {
        let log = self.clone();
        move |result| log.push(describe(tag, result.map(|_| Vec::new())))
    }

    pub fn data(&self, tag: &'static str) -> impl FnOnce(gattlink_core::Result<Vec<u8>>) + Send + 'static {
        let log = self.clone();
        move |result| log.push(describe(tag, result))
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

fn describe(tag: &str, result: gattlink_core::Result<Vec<u8>>) -> String {
    match result {
        Ok(data) if data.is_empty() => format!("{}:ok", tag),
        Ok(data) => format!("{}:ok:{:?}", tag, data),
        Err(GattError::ConnectionLost) => format!("{}:lost", tag),
        Err(GattError::NotConnected) => format!("{}:not-connected", tag),
        Err(GattError::Notification { .. }) => format!("{}:notify-failed", tag),
        Err(GattError::Operation { .. }) => format!("{}:failed", tag),
        Err(e) => format!("{}:{}", tag, e),
    }
}
