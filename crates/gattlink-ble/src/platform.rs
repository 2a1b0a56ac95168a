//! [`BlePlatform`] over btleplug
//!
//! The core's primitives are synchronous and non-blocking, btleplug's are
//! async. Each primitive spawns a short task on the runtime captured at
//! construction; the task reports back through the event channel, which a
//! single dispatcher drains.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use gattlink_core::{
    BlePlatform, CharacteristicHandle, CharacteristicInfo, GattConfig, PeripheralHandle,
    PeripheralListener, PlatformError, ScanMode, ScanOptions, ScanSink, ServiceInfo,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::discovery::{peripheral_key, scan_result_from};
use crate::error::{BackendError, Result};
use crate::events::{run_dispatcher, PlatformEvent, Routes};
use crate::handles::HandleTable;
use crate::links::LinkTable;

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

struct Backend {
    adapter: Adapter,
    runtime: Handle,
    events: mpsc::UnboundedSender<PlatformEvent>,
    routes: Arc<Mutex<Routes>>,
    peripherals: Mutex<HashMap<String, Peripheral>>,
    handles: Mutex<HandleTable<Characteristic>>,
    links: Mutex<LinkTable>,
    notification_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Backend {
    fn send(&self, event: PlatformEvent) {
        if self.events.send(event).is_err() {
            debug!("Event dispatcher gone, dropping event");
        }
    }

    fn peripheral(&self, key: &str) -> Option<Peripheral> {
        self.peripherals.lock().get(key).cloned()
    }

    /// Peripheral and characteristic behind `handle`, if both are still known
    fn target(&self, handle: CharacteristicHandle) -> Option<(String, Peripheral, Characteristic)> {
        let (key, characteristic) = self.handles.lock().get(handle).cloned()?;
        let peripheral = self.peripheral(&key)?;
        Some((key, peripheral, characteristic))
    }

    async fn remember(&self, id: &btleplug::platform::PeripheralId) -> Option<String> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let key = peripheral_key(id);
        self.peripherals.lock().insert(key.clone(), peripheral);
        Some(key)
    }

    async fn handle_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ManufacturerDataAdvertisement { id, .. }
            | CentralEvent::ServicesAdvertisement { id, .. } => {
                let Some(key) = self.remember(&id).await else {
                    return;
                };
                if !self.routes.lock().is_scanning() {
                    return;
                }
                let Some(peripheral) = self.peripheral(&key) else {
                    return;
                };
                match peripheral.properties().await {
                    Ok(Some(properties)) => {
                        self.send(PlatformEvent::Advertisement(scan_result_from(key, &properties)))
                    }
                    Ok(None) => {}
                    Err(e) => debug!("No properties for {}: {}", key, e),
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let key = peripheral_key(&id);
                let lost = self.links.lock().lost(&key);
                if !lost {
                    debug!("Adapter disconnect for {} already reported", key);
                    return;
                }
                if let Some(task) = self.notification_tasks.lock().remove(&key) {
                    task.abort();
                }
                warn!("Link to {} lost", key);
                self.send(PlatformEvent::Disconnected(key));
            }
            _ => {}
        }
    }

    async fn connect(self: Arc<Self>, key: String, peripheral: Peripheral, attempt: u64) {
        let outcome = match peripheral.connect().await {
            Ok(()) => peripheral.discover_services().await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            error!("Failed to connect to {}: {}", key, e);
            if peripheral.is_connected().await.unwrap_or(false) {
                let _ = peripheral.disconnect().await;
            }
            let waiting = self.links.lock().failed(&key, attempt);
            if waiting {
                self.send(PlatformEvent::Connected(key, Err(PlatformError::new(e.to_string()))));
            }
            return;
        }

        let established = self.links.lock().established(&key, attempt);
        if !established {
            debug!("Connect to {} finished after the attempt was abandoned", key);
            let idle = self.links.lock().is_idle(&key);
            if idle {
                let _ = peripheral.disconnect().await;
            }
            return;
        }

        match peripheral.notifications().await {
            Ok(mut notifications) => {
                let backend = self.clone();
                let route_key = key.clone();
                let task = self.runtime.spawn(async move {
                    while let Some(notification) = notifications.next().await {
                        let handle = backend
                            .handles
                            .lock()
                            .notify_route(&route_key, notification.uuid);
                        match handle {
                            Some(handle) => backend.send(PlatformEvent::Notify(
                                route_key.clone(),
                                handle,
                                notification.value,
                            )),
                            None => debug!(
                                "Notification for unmapped characteristic {} on {}",
                                notification.uuid, route_key
                            ),
                        }
                    }
                    debug!("Notification stream for {} ended", route_key);
                });
                if let Some(previous) = self.notification_tasks.lock().insert(key.clone(), task) {
                    previous.abort();
                }
            }
            Err(e) => error!("Failed to get notifications stream for {}: {}", key, e),
        }

        info!("Connected to {}", key);
        self.send(PlatformEvent::Connected(key, Ok(())));
    }
}

// ----------------------------------------------------------------------------
// Btleplug Platform
// ----------------------------------------------------------------------------

/// Platform capability backed by the host's Bluetooth stack
///
/// Must be created inside a tokio runtime; every background task is spawned
/// on that runtime and aborted when the platform is dropped.
pub struct BtleplugPlatform {
    backend: Arc<Backend>,
    tasks: Vec<JoinHandle<()>>,
}

impl BtleplugPlatform {
    /// Bring up the adapter named by `config.scan.radio_selector`, or the
    /// first adapter when no selector is set
    pub async fn new(config: &GattConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| BackendError::NoRuntime)?;
        let manager = Manager::new()
            .await
            .map_err(|e| BackendError::Manager(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| BackendError::Manager(e.to_string()))?;

        let adapter = select_adapter(adapters, config.scan.radio_selector.as_deref()).await?;
        let central_events = adapter
            .events()
            .await
            .map_err(|e| BackendError::EventStreamFailed(e.to_string()))?;

        let mut peripherals = HashMap::new();
        for peripheral in adapter.peripherals().await.unwrap_or_default() {
            peripherals.insert(peripheral_key(&peripheral.id()), peripheral);
        }
        debug!("{} peripherals already known to the adapter", peripherals.len());

        let (events, receiver) = mpsc::unbounded_channel();
        let routes = Arc::new(Mutex::new(Routes::default()));
        let backend = Arc::new(Backend {
            adapter,
            runtime: runtime.clone(),
            events,
            routes: routes.clone(),
            peripherals: Mutex::new(peripherals),
            handles: Mutex::new(HandleTable::default()),
            links: Mutex::new(LinkTable::default()),
            notification_tasks: Mutex::new(HashMap::new()),
        });

        let dispatcher = runtime.spawn(run_dispatcher(routes, receiver));
        let central = {
            let backend = backend.clone();
            let mut central_events = central_events;
            runtime.spawn(async move {
                while let Some(event) = central_events.next().await {
                    backend.handle_central_event(event).await;
                }
                warn!("BLE adapter event stream ended");
            })
        };

        Ok(Self {
            backend,
            tasks: vec![dispatcher, central],
        })
    }

    /// Description of the adapter in use
    pub async fn adapter_info(&self) -> String {
        self.backend
            .adapter
            .adapter_info()
            .await
            .unwrap_or_else(|e| format!("unknown adapter ({})", e))
    }
}

async fn select_adapter(adapters: Vec<Adapter>, selector: Option<&str>) -> Result<Adapter> {
    let Some(selector) = selector else {
        return adapters.into_iter().next().ok_or(BackendError::AdapterNotAvailable);
    };

    for adapter in adapters {
        let info = adapter.adapter_info().await.unwrap_or_default();
        if info.to_lowercase().contains(&selector.to_lowercase()) {
            info!("Using BLE adapter {}", info);
            return Ok(adapter);
        }
    }
    Err(BackendError::NoMatchingAdapter {
        selector: selector.to_string(),
    })
}

impl BlePlatform for BtleplugPlatform {
    fn start_scan(&self, options: &ScanOptions, sink: ScanSink) -> gattlink_core::Result<()> {
        if options.mode == ScanMode::Passive {
            warn!("Passive scanning is not supported by btleplug, scanning actively");
        }
        if let Some(selector) = &options.radio_selector {
            debug!("Radio selector {} is applied when the platform is created", selector);
        }

        self.backend.routes.lock().set_scan_sink(Some(sink));
        let backend = self.backend.clone();
        self.backend.runtime.spawn(async move {
            if let Err(e) = backend.adapter.start_scan(ScanFilter::default()).await {
                error!("Failed to start BLE scan: {}", e);
            }
        });
        Ok(())
    }

    fn stop_scan(&self) {
        self.backend.routes.lock().set_scan_sink(None);
        let backend = self.backend.clone();
        self.backend.runtime.spawn(async move {
            if let Err(e) = backend.adapter.stop_scan().await {
                error!("Failed to stop BLE scan: {}", e);
            }
        });
    }

    fn resolve_peripheral(&self, identifier: &str) -> Option<PeripheralHandle> {
        self.backend
            .peripherals
            .lock()
            .contains_key(identifier)
            .then(|| PeripheralHandle::new(identifier))
    }

    fn register_listener(&self, peripheral: &PeripheralHandle, listener: Weak<dyn PeripheralListener>) {
        self.backend
            .routes
            .lock()
            .register(peripheral.identifier(), listener);
    }

    fn unregister_listener(&self, peripheral: &PeripheralHandle) {
        self.backend.routes.lock().unregister(peripheral.identifier());
    }

    fn connect(&self, peripheral: &PeripheralHandle) {
        let key = peripheral.identifier().to_string();
        let Some(target) = self.backend.peripheral(&key) else {
            self.backend.send(PlatformEvent::Connected(
                key,
                Err(PlatformError::new("peripheral is no longer known to the adapter")),
            ));
            return;
        };
        let attempt = self.backend.links.lock().begin(&key);
        self.backend
            .runtime
            .spawn(self.backend.clone().connect(key, target, attempt));
    }

    fn disconnect(&self, peripheral: &PeripheralHandle) {
        let key = peripheral.identifier().to_string();
        // Claim the link now so the adapter's own event for it is not reported again
        let report = self.backend.links.lock().close(&key);
        let backend = self.backend.clone();
        self.backend.runtime.spawn(async move {
            if let Some(task) = backend.notification_tasks.lock().remove(&key) {
                task.abort();
            }
            if let Some(target) = backend.peripheral(&key) {
                if let Err(e) = target.disconnect().await {
                    error!("Failed to disconnect from {}: {}", key, e);
                }
            }
            if report {
                backend.send(PlatformEvent::Disconnected(key));
            }
        });
    }

    fn services(&self, peripheral: &PeripheralHandle) -> Vec<ServiceInfo> {
        let key = peripheral.identifier();
        let Some(target) = self.backend.peripheral(key) else {
            return Vec::new();
        };

        let mut handles = self.backend.handles.lock();
        target
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|characteristic| CharacteristicInfo {
                        uuid: characteristic.uuid,
                        handle: handles.assign(
                            key,
                            service.uuid,
                            characteristic.uuid,
                            characteristic,
                        ),
                    })
                    .collect(),
            })
            .collect()
    }

    fn read(&self, peripheral: &PeripheralHandle, characteristic: CharacteristicHandle) {
        let Some((key, target, found)) = self.backend.target(characteristic) else {
            return self.report_unknown(peripheral, characteristic, Operation::Read);
        };
        let backend = self.backend.clone();
        self.backend.runtime.spawn(async move {
            let result = target
                .read(&found)
                .await
                .map_err(|e| PlatformError::new(e.to_string()));
            backend.send(PlatformEvent::Read(key, characteristic, result));
        });
    }

    fn write(&self, peripheral: &PeripheralHandle, characteristic: CharacteristicHandle, value: &[u8]) {
        let Some((key, target, found)) = self.backend.target(characteristic) else {
            return self.report_unknown(peripheral, characteristic, Operation::Write);
        };
        let value = value.to_vec();
        let backend = self.backend.clone();
        self.backend.runtime.spawn(async move {
            let result = target
                .write(&found, &value, WriteType::WithResponse)
                .await
                .map_err(|e| PlatformError::new(e.to_string()));
            backend.send(PlatformEvent::Write(key, characteristic, result));
        });
    }

    fn write_without_response(
        &self,
        _peripheral: &PeripheralHandle,
        characteristic: CharacteristicHandle,
        value: &[u8],
    ) {
        let Some((key, target, found)) = self.backend.target(characteristic) else {
            warn!("Unacknowledged write to unknown characteristic {}", characteristic);
            return;
        };
        let value = value.to_vec();
        self.backend.runtime.spawn(async move {
            if let Err(e) = target.write(&found, &value, WriteType::WithoutResponse).await {
                error!("Unacknowledged write to {} on {} failed: {}", found.uuid, key, e);
            }
        });
    }

    fn set_notify(&self, peripheral: &PeripheralHandle, characteristic: CharacteristicHandle, enabled: bool) {
        let Some((key, target, found)) = self.backend.target(characteristic) else {
            if enabled {
                self.report_unknown(peripheral, characteristic, Operation::Subscribe);
            }
            return;
        };
        let backend = self.backend.clone();
        self.backend.runtime.spawn(async move {
            if enabled {
                let result = target.subscribe(&found).await;
                if let Err(e) = &result {
                    error!("Failed to subscribe to {} on {}: {}", found.uuid, key, e);
                }
                backend.send(PlatformEvent::NotificationState(key, characteristic, result.is_ok()));
            } else if let Err(e) = target.unsubscribe(&found).await {
                error!("Failed to unsubscribe from {} on {}: {}", found.uuid, key, e);
            }
        });
    }
}

enum Operation {
    Read,
    Write,
    Subscribe,
}

impl BtleplugPlatform {
    /// Complete an acknowledged primitive aimed at a handle this backend
    /// never issued
    fn report_unknown(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: CharacteristicHandle,
        operation: Operation,
    ) {
        warn!("Unknown characteristic {} on {}", characteristic, peripheral.identifier());
        let key = peripheral.identifier().to_string();
        let error = PlatformError::new(format!("unknown characteristic {}", characteristic));
        let event = match operation {
            Operation::Read => PlatformEvent::Read(key, characteristic, Err(error)),
            Operation::Write => PlatformEvent::Write(key, characteristic, Err(error)),
            Operation::Subscribe => PlatformEvent::NotificationState(key, characteristic, false),
        };
        self.backend.send(event);
    }
}

impl Drop for BtleplugPlatform {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for (_, task) in self.backend.notification_tasks.lock().drain() {
            task.abort();
        }
    }
}
