//! Connection lifecycle and characteristic lookup

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use gattlink_core::{
    from_short, AddressCache, CharacteristicInfo, Connection, ConnectionState, GattError,
    ServiceInfo,
};

fn connected(platform: &Arc<MockPlatform>) -> Connection {
    let connection = Connection::new(platform.clone(), device_record(), &test_config());
    let outcomes = Outcomes::new();
    connection.connect_async(outcomes.status("connect"));
    platform.fire_connect(Ok(()));
    assert_eq!(outcomes.entries(), vec!["connect:ok"]);
    platform.clear_calls();
    connection
}

// ----------------------------------------------------------------------------
// Connect
// ----------------------------------------------------------------------------

#[test]
fn test_connect_resolves_cached_address_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = AddressCache::open(dir.path().join("known_devices.json")).unwrap();
    cache.insert("AA:BB:CC:DD:EE:FF", "platform-id-1").unwrap();

    let platform = MockPlatform::new();
    platform.set_reachable("platform-id-1");

    let connection =
        Connection::open(platform.clone(), &cache, "aa:bb:cc:dd:ee:ff", &test_config()).unwrap();
    assert_eq!(connection.address(), "AA:BB:CC:DD:EE:FF");

    let outcomes = Outcomes::new();
    connection.connect_async(outcomes.status("connect"));
    assert_eq!(connection.state(), ConnectionState::Connecting);
    assert_eq!(platform.calls(), vec![Call::Connect("platform-id-1".to_string())]);
    assert!(outcomes.entries().is_empty());

    platform.fire_connect(Ok(()));
    assert_eq!(outcomes.entries(), vec!["connect:ok"]);
    assert!(connection.is_connected());
}

#[test]
fn test_connect_fails_when_platform_reports_failure() {
    let platform = MockPlatform::new();
    let connection = Connection::new(platform.clone(), device_record(), &test_config());

    let outcomes = Outcomes::new();
    connection.connect_async(outcomes.status("connect"));
    platform.fire_connect(Err("peer refused"));

    let entries = outcomes.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("peer refused"), "{:?}", entries);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[test]
fn test_unknown_address_is_reported_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let cache = AddressCache::open(dir.path().join("known_devices.json")).unwrap();
    let platform = MockPlatform::new();

    let err = Connection::open(platform, &cache, "11:22:33:44:55:66", &test_config()).unwrap_err();
    assert_eq!(
        err,
        GattError::DeviceNotFound {
            address: "11:22:33:44:55:66".to_string()
        }
    );
}

#[test]
fn test_unresolvable_identifier_fails_without_retry() {
    let platform = MockPlatform::new();
    let mut record = device_record();
    record.platform_identifier = "gone".to_string();
    let connection = Connection::new(platform.clone(), record, &test_config());

    let result = Arc::new(parking_lot::Mutex::new(None));
    let slot = result.clone();
    connection.connect_async(move |r| *slot.lock() = Some(r));

    assert!(matches!(
        result.lock().take(),
        Some(Err(GattError::Connection { .. }))
    ));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(platform.calls().is_empty());
}

#[test]
fn test_connect_only_from_disconnected() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);

    let outcomes = Outcomes::new();
    connection.connect_async(outcomes.status("again"));
    assert_eq!(outcomes.entries(), vec!["again:Cannot connect while Connected"]);
    assert!(platform.calls().is_empty());
}

// ----------------------------------------------------------------------------
// Disconnect
// ----------------------------------------------------------------------------

#[test]
fn test_requested_disconnect_invokes_handler_on_confirmation() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);

    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = disconnects.clone();
    connection.on_disconnect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    connection.disconnect().unwrap();
    assert_eq!(connection.state(), ConnectionState::Disconnecting);
    assert_eq!(platform.calls(), vec![Call::Disconnect(DEVICE_IDENTIFIER.to_string())]);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);

    platform.fire_disconnect();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    // A duplicate signal is ignored
    platform.fire_disconnect();
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_disconnect_requires_a_connection() {
    let platform = MockPlatform::new();
    let connection = Connection::new(platform, device_record(), &test_config());

    assert_eq!(
        connection.disconnect(),
        Err(GattError::InvalidState {
            operation: "disconnect",
            state: ConnectionState::Disconnected,
        })
    );
}

#[test]
fn test_disconnect_while_connecting_aborts_attempt() {
    let platform = MockPlatform::new();
    let connection = Connection::new(platform.clone(), device_record(), &test_config());

    let result = Arc::new(parking_lot::Mutex::new(None));
    let slot = result.clone();
    connection.connect_async(move |r| *slot.lock() = Some(r));

    connection.disconnect().unwrap();
    platform.fire_disconnect();

    assert!(matches!(
        result.lock().take(),
        Some(Err(GattError::Connection { .. }))
    ));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[test]
fn test_late_disconnect_signal_does_not_fail_reconnect() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);

    connection.disconnect().unwrap();
    platform.fire_disconnect();
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    let outcomes = Outcomes::new();
    connection.connect_async(outcomes.status("reconnect"));

    // Second report of the old link's end, delivered after the new attempt began
    platform.fire_disconnect();
    assert_eq!(connection.state(), ConnectionState::Connecting);
    assert!(outcomes.entries().is_empty());

    platform.fire_connect(Ok(()));
    assert_eq!(outcomes.entries(), vec!["reconnect:ok"]);
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[test]
fn test_link_loss_uses_same_disconnect_handler() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);

    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = disconnects.clone();
    connection.on_disconnect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    platform.fire_disconnect();
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(!connection.is_connected());
}

#[test]
fn test_reconnect_keeps_cached_characteristics() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);
    let before = connection.find_characteristic("2a19").unwrap().unwrap();

    platform.fire_disconnect();
    assert!(!before.is_connected());

    let outcomes = Outcomes::new();
    connection.connect_async(outcomes.status("reconnect"));
    platform.fire_connect(Ok(()));
    assert_eq!(outcomes.entries(), vec!["reconnect:ok"]);

    let after = connection.find_characteristic("2A19").unwrap().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(after.is_connected());

    platform.clear_calls();
    after.read_async(outcomes.data("read"));
    assert_eq!(platform.calls(), vec![Call::Read(BATTERY_HANDLE)]);
}

#[test]
fn test_drop_disconnects_and_fails_pending() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);
    let battery = connection.find_characteristic("2a19").unwrap().unwrap();

    let outcomes = Outcomes::new();
    battery.read_async(outcomes.data("r1"));
    battery.read_async(outcomes.data("r2"));
    platform.clear_calls();

    drop(connection);

    assert_eq!(outcomes.entries(), vec!["r1:lost", "r2:lost"]);
    assert_eq!(
        platform.calls(),
        vec![
            Call::Disconnect(DEVICE_IDENTIFIER.to_string()),
            Call::Unregister(DEVICE_IDENTIFIER.to_string()),
        ]
    );
    assert!(!platform.has_listener());
    assert!(!battery.is_connected());

    battery.read_async(outcomes.data("r3"));
    assert_eq!(outcomes.entries().last().unwrap(), "r3:not-connected");
}

// ----------------------------------------------------------------------------
// Characteristic Lookup
// ----------------------------------------------------------------------------

#[test]
fn test_find_characteristic_is_format_insensitive_and_cached() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);

    let short = connection.find_characteristic("2a19").unwrap().unwrap();
    let full = connection
        .find_characteristic("00002A19-0000-1000-8000-00805F9B34FB")
        .unwrap()
        .unwrap();
    let prefixed = connection.find_characteristic("0x2A19").unwrap().unwrap();

    assert!(Arc::ptr_eq(&short, &full));
    assert!(Arc::ptr_eq(&short, &prefixed));
    assert_eq!(short.uuid(), battery_uuid());
    assert_eq!(short.service_uuid(), from_short(BATTERY_SERVICE));
    assert_eq!(short.handle(), BATTERY_HANDLE);
}

#[test]
fn test_missing_characteristic_is_none() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);

    assert!(connection.find_characteristic("2a00").unwrap().is_none());
    assert!(matches!(
        connection.find_characteristic("not-a-uuid"),
        Err(GattError::InvalidUuid(_))
    ));
}

#[test]
fn test_find_characteristic_requires_connection() {
    let platform = MockPlatform::new();
    let connection = Connection::new(platform, device_record(), &test_config());

    assert_eq!(
        connection.find_characteristic("2a19").unwrap_err(),
        GattError::NotConnected
    );
}

#[test]
fn test_first_service_in_enumeration_order_wins() {
    let platform = MockPlatform::new();
    let shared_uuid = from_short(0x2a05);
    platform.set_services(vec![
        ServiceInfo {
            uuid: from_short(0x1801),
            characteristics: vec![CharacteristicInfo {
                handle: gattlink_core::CharacteristicHandle(10),
                uuid: shared_uuid,
            }],
        },
        ServiceInfo {
            uuid: from_short(0x1802),
            characteristics: vec![CharacteristicInfo {
                handle: gattlink_core::CharacteristicHandle(20),
                uuid: shared_uuid,
            }],
        },
    ]);
    let connection = connected(&platform);

    let found = connection.find_characteristic("2a05").unwrap().unwrap();
    assert_eq!(found.service_uuid(), from_short(0x1801));
    assert_eq!(found.handle(), gattlink_core::CharacteristicHandle(10));
}

#[test]
fn test_service_exists() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);

    assert!(connection.service_exists("180F").unwrap());
    assert!(connection.service_exists("0000180a-0000-1000-8000-00805f9b34fb").unwrap());
    assert!(!connection.service_exists("1812").unwrap());
}

#[test]
fn test_callbacks_for_unknown_handles_are_ignored() {
    let platform = MockPlatform::new();
    let connection = connected(&platform);
    let battery = connection.find_characteristic("2a19").unwrap().unwrap();

    let outcomes = Outcomes::new();
    battery.read_async(outcomes.data("read"));

    platform.fire_read(MODEL_HANDLE, Ok(vec![9]));
    platform.fire_write(gattlink_core::CharacteristicHandle(99), Ok(()));
    platform.fire_notification_state(gattlink_core::CharacteristicHandle(99), true);
    assert!(outcomes.entries().is_empty());

    platform.fire_read(BATTERY_HANDLE, Ok(vec![87]));
    assert_eq!(outcomes.entries(), vec!["read:ok:[87]"]);
}
