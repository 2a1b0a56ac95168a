//! Connection lifecycle for one peripheral
//!
//! ```text
//! Disconnected --connect--> Connecting --on_connect(ok)--> Connected
//!      ^                        |                              |
//!      |                 on_connect(err)                  disconnect
//!      |                        v                              v
//!      +-------------------- Disconnected <--on_disconnect-- Disconnecting
//! ```
//!
//! The platform may also report `on_disconnect` at any time while connected.
//! Every path into `Disconnected` fails the pending operations of every
//! characteristic with [`GattError::ConnectionLost`], in submission order.
//! A disconnect signal that arrives while `Connecting` belongs to the previous
//! link and is ignored; an attempt ends through `on_connect` or `disconnect`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{AddressCache, DeviceRecord};
use crate::characteristic::Characteristic;
use crate::config::GattConfig;
use crate::engine::{wait_for, PendingOperation, StatusHandler};
use crate::error::{GattError, Result};
use crate::identifiers::parse_uuid;
use crate::platform::{
    BlePlatform, CharacteristicHandle, PeripheralHandle, PeripheralListener, PlatformError,
};

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Standing handler for disconnect events
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

struct ConnectionInner {
    state: ConnectionState,
    peripheral: Option<Arc<PeripheralHandle>>,
    characteristics: HashMap<Uuid, Arc<Characteristic>>,
    by_handle: HashMap<CharacteristicHandle, Arc<Characteristic>>,
    pending_connect: Option<StatusHandler>,
    disconnect_handler: Option<DisconnectHandler>,
    close_waiters: Vec<oneshot::Sender<Result<()>>>,
}

/// State shared between a [`Connection`], its characteristics and the
/// platform's listener registration
pub(crate) struct ConnectionShared {
    record: DeviceRecord,
    platform: Arc<dyn BlePlatform>,
    operation_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    sequence: AtomicU64,
    me: Weak<ConnectionShared>,
    inner: Mutex<ConnectionInner>,
}

impl ConnectionShared {
    pub(crate) fn is_connected(&self) -> bool {
        self.inner.lock().state == ConnectionState::Connected
    }

    pub(crate) fn peripheral(&self) -> Option<Arc<PeripheralHandle>> {
        self.inner.lock().peripheral.clone()
    }

    pub(crate) fn platform(&self) -> &Arc<dyn BlePlatform> {
        &self.platform
    }

    pub(crate) fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    /// Connection-wide submission counter used to order teardown failures
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn characteristic_for(&self, handle: CharacteristicHandle) -> Option<Arc<Characteristic>> {
        let found = self.inner.lock().by_handle.get(&handle).cloned();
        if found.is_none() {
            warn!(
                "Ignoring callback for unknown characteristic {} on {}",
                handle, self.record.hardware_address
            );
        }
        found
    }

    /// Fail every queued operation across all characteristics, oldest first
    fn fail_pending(characteristics: &[Arc<Characteristic>]) -> usize {
        let mut pending: Vec<PendingOperation> = characteristics
            .iter()
            .flat_map(|characteristic| characteristic.drain_pending())
            .collect();
        pending.sort_by_key(PendingOperation::sequence);

        let count = pending.len();
        for operation in pending {
            operation.fail(GattError::ConnectionLost);
        }
        count
    }
}

impl PeripheralListener for ConnectionShared {
    fn on_connect(&self, result: std::result::Result<(), PlatformError>) {
        let handler = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Connecting {
                warn!(
                    "Ignoring connect completion for {} while {:?}",
                    self.record.hardware_address, inner.state
                );
                return;
            }
            if result.is_ok() {
                // Reopen before the state flips so no submission sees a closed queue
                for characteristic in inner.by_handle.values() {
                    characteristic.reopen();
                }
                inner.state = ConnectionState::Connected;
            } else {
                inner.state = ConnectionState::Disconnected;
            }
            inner.pending_connect.take()
        };

        let outcome = match result {
            Ok(()) => {
                info!("Connected to {}", self.record.hardware_address);
                Ok(())
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", self.record.hardware_address, e);
                Err(GattError::Connection {
                    address: self.record.hardware_address.clone(),
                    reason: e.to_string(),
                })
            }
        };

        if let Some(handler) = handler {
            handler(outcome);
        }
    }

    fn on_disconnect(&self) {
        let (connect_handler, characteristics, disconnect_handler, waiters) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    debug!(
                        "Ignoring stale disconnect for {} while {:?}",
                        self.record.hardware_address, inner.state
                    );
                    return;
                }
                ConnectionState::Connected | ConnectionState::Disconnecting => {}
            }
            inner.state = ConnectionState::Disconnected;
            (
                inner.pending_connect.take(),
                inner.by_handle.values().cloned().collect::<Vec<_>>(),
                inner.disconnect_handler.clone(),
                std::mem::take(&mut inner.close_waiters),
            )
        };

        let failed = Self::fail_pending(&characteristics);
        info!(
            "Disconnected from {} ({} pending operations failed)",
            self.record.hardware_address, failed
        );

        if let Some(handler) = connect_handler {
            handler(Err(GattError::Connection {
                address: self.record.hardware_address.clone(),
                reason: "disconnected before the connection completed".to_string(),
            }));
        }
        if let Some(handler) = disconnect_handler {
            handler();
        }
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_read(
        &self,
        characteristic: CharacteristicHandle,
        result: std::result::Result<Vec<u8>, PlatformError>,
    ) {
        if let Some(characteristic) = self.characteristic_for(characteristic) {
            characteristic.complete_read(result);
        }
    }

    fn on_write(
        &self,
        characteristic: CharacteristicHandle,
        result: std::result::Result<(), PlatformError>,
    ) {
        if let Some(characteristic) = self.characteristic_for(characteristic) {
            characteristic.complete_write(result);
        }
    }

    fn on_notify(&self, characteristic: CharacteristicHandle, value: Vec<u8>) {
        if let Some(characteristic) = self.characteristic_for(characteristic) {
            characteristic.deliver_notification(&value);
        }
    }

    fn on_notification_state(&self, characteristic: CharacteristicHandle, success: bool) {
        if let Some(characteristic) = self.characteristic_for(characteristic) {
            characteristic.complete_notification_state(success);
        }
    }
}

impl Drop for ConnectionShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let characteristics: Vec<_> = inner.by_handle.values().cloned().collect();
        let connect_handler = inner.pending_connect.take();

        if let Some(peripheral) = inner.peripheral.take() {
            if inner.state != ConnectionState::Disconnected {
                self.platform.disconnect(&peripheral);
            }
            self.platform.unregister_listener(&peripheral);
        }
        inner.state = ConnectionState::Disconnected;

        // Handlers fire exactly once, even when the connection is dropped mid-operation
        Self::fail_pending(&characteristics);
        if let Some(handler) = connect_handler {
            handler(Err(GattError::ConnectionLost));
        }
        debug!("Released connection to {}", self.record.hardware_address);
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// GATT connection to one remembered peripheral
///
/// Owns the peripheral handle and every [`Characteristic`] found on it.
/// Dropping the connection disconnects and releases the handle.
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    /// Create a connection for `address`, resolved through `cache`
    ///
    /// An address missing from the cache is reported here, synchronously.
    pub fn open(
        platform: Arc<dyn BlePlatform>,
        cache: &AddressCache,
        address: &str,
        config: &GattConfig,
    ) -> Result<Self> {
        let record = cache.require(address)?;
        Ok(Self::new(platform, record, config))
    }

    /// Create a connection for an already-resolved record
    pub fn new(platform: Arc<dyn BlePlatform>, record: DeviceRecord, config: &GattConfig) -> Self {
        let shared = Arc::new_cyclic(|me| ConnectionShared {
            record,
            platform,
            operation_timeout: config.operation_timeout,
            connect_timeout: config.connect_timeout,
            sequence: AtomicU64::new(0),
            me: me.clone(),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                peripheral: None,
                characteristics: HashMap::new(),
                by_handle: HashMap::new(),
                pending_connect: None,
                disconnect_handler: None,
                close_waiters: Vec::new(),
            }),
        });
        Self { shared }
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.shared.record
    }

    /// Canonical hardware address of the peripheral
    pub fn address(&self) -> &str {
        &self.shared.record.hardware_address
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Register the standing disconnect handler; the last one wins
    ///
    /// Called for requested disconnects and for link loss alike, after the
    /// pending operations have been failed.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.inner.lock().disconnect_handler = Some(Arc::new(handler));
    }

    /// Start connecting; `handler` receives the outcome
    ///
    /// Valid only while disconnected. A platform identifier that no longer
    /// resolves to a reachable peripheral fails with [`GattError::Connection`]
    /// without retrying.
    pub fn connect_async<F>(&self, handler: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let shared = &self.shared;
        let known = {
            let mut inner = shared.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                let state = inner.state;
                drop(inner);
                return handler(Err(GattError::InvalidState {
                    operation: "connect",
                    state,
                }));
            }
            inner.state = ConnectionState::Connecting;
            inner.pending_connect = Some(Box::new(handler));
            inner.peripheral.clone()
        };

        let peripheral = match known {
            Some(peripheral) => peripheral,
            None => match shared.platform.resolve_peripheral(&shared.record.platform_identifier) {
                Some(handle) => {
                    let handle = Arc::new(handle);
                    let listener: Weak<dyn PeripheralListener> = shared.me.clone();
                    shared.platform.register_listener(&handle, listener);
                    shared.inner.lock().peripheral = Some(handle.clone());
                    handle
                }
                None => {
                    let handler = {
                        let mut inner = shared.inner.lock();
                        inner.state = ConnectionState::Disconnected;
                        inner.pending_connect.take()
                    };
                    warn!(
                        "Peripheral {} ({}) is not reachable",
                        shared.record.hardware_address, shared.record.platform_identifier
                    );
                    if let Some(handler) = handler {
                        handler(Err(GattError::Connection {
                            address: shared.record.hardware_address.clone(),
                            reason: format!(
                                "platform identifier {} does not resolve to a reachable peripheral",
                                shared.record.platform_identifier
                            ),
                        }));
                    }
                    return;
                }
            },
        };

        info!("Connecting to {}", shared.record.hardware_address);
        shared.platform.connect(&peripheral);
    }

    /// Connect and wait for the outcome
    ///
    /// When `connect_timeout` is configured and expires, the attempt is
    /// aborted and `Timeout` returned.
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.connect_async(move |result| {
            let _ = tx.send(result);
        });

        let outcome = wait_for("connect", self.shared.connect_timeout, rx).await;
        if let Err(GattError::Timeout { .. }) = outcome {
            let _ = self.disconnect();
        }
        outcome
    }

    /// Request a disconnect
    ///
    /// Valid while connected, or while connecting to abort the attempt. The
    /// disconnect handler runs once the platform confirms.
    pub fn disconnect(&self) -> Result<()> {
        let peripheral = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => {}
                state => {
                    return Err(GattError::InvalidState {
                        operation: "disconnect",
                        state,
                    })
                }
            }
            inner.state = ConnectionState::Disconnecting;
            inner.peripheral.clone()
        };

        info!("Disconnecting from {}", self.address());
        if let Some(peripheral) = peripheral {
            self.shared.platform.disconnect(&peripheral);
        }
        Ok(())
    }

    /// Disconnect and wait until the platform confirms the link is down
    ///
    /// Already disconnected is success. Bounded by `connect_timeout` when
    /// configured.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == ConnectionState::Disconnected {
                return Ok(());
            }
            inner.close_waiters.push(tx);
        }

        // Disconnecting already means a request is on its way
        if let Err(e) = self.disconnect() {
            debug!("Close of {}: {}", self.address(), e);
        }
        wait_for("disconnect", self.shared.connect_timeout, rx).await
    }

    /// Find a characteristic by UUID in any string form
    ///
    /// `Ok(None)` means the peripheral has no such characteristic. Repeated
    /// lookups return the same instance.
    pub fn find_characteristic(&self, uuid: &str) -> Result<Option<Arc<Characteristic>>> {
        self.find_characteristic_by_uuid(parse_uuid(uuid)?)
    }

    /// Find a characteristic by UUID
    ///
    /// Services are walked in enumeration order and the first match is bound.
    pub fn find_characteristic_by_uuid(&self, uuid: Uuid) -> Result<Option<Arc<Characteristic>>> {
        let peripheral = {
            let inner = self.shared.inner.lock();
            if inner.state != ConnectionState::Connected {
                return Err(GattError::NotConnected);
            }
            if let Some(characteristic) = inner.characteristics.get(&uuid) {
                return Ok(Some(characteristic.clone()));
            }
            inner.peripheral.clone().ok_or(GattError::NotConnected)?
        };

        let services = self.shared.platform.services(&peripheral);
        let found = services.iter().find_map(|service| {
            service
                .characteristics
                .iter()
                .find(|characteristic| characteristic.uuid == uuid)
                .map(|characteristic| (service.uuid, characteristic.handle))
        });

        let Some((service_uuid, handle)) = found else {
            debug!("No characteristic {} on {}", uuid, self.address());
            return Ok(None);
        };

        let mut inner = self.shared.inner.lock();
        let characteristic = inner
            .characteristics
            .entry(uuid)
            .or_insert_with(|| {
                Arc::new(Characteristic::new(
                    uuid,
                    service_uuid,
                    handle,
                    self.shared.me.clone(),
                ))
            })
            .clone();
        inner
            .by_handle
            .insert(characteristic.handle(), characteristic.clone());

        debug!("Bound characteristic {} ({}) on {}", uuid, handle, self.address());
        Ok(Some(characteristic))
    }

    /// Whether the peripheral exposes a service with `uuid`
    pub fn service_exists(&self, uuid: &str) -> Result<bool> {
        let uuid = parse_uuid(uuid)?;
        let Some(peripheral) = self.shared.peripheral() else {
            return Ok(false);
        };
        Ok(self
            .shared
            .platform
            .services(&peripheral)
            .iter()
            .any(|service| service.uuid == uuid))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}
