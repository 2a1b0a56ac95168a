//! Single event-dispatch loop
//!
//! Every btleplug task reports back by sending a [`PlatformEvent`]; one task
//! drains the channel and invokes listeners, so the core sees all callbacks
//! on one logical thread.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use gattlink_core::{CharacteristicHandle, PeripheralListener, PlatformError, ScanResult, ScanSink};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Signal produced by a backend task
#[derive(Debug)]
pub(crate) enum PlatformEvent {
    Connected(String, Result<(), PlatformError>),
    Disconnected(String),
    Read(String, CharacteristicHandle, Result<Vec<u8>, PlatformError>),
    Write(String, CharacteristicHandle, Result<(), PlatformError>),
    Notify(String, CharacteristicHandle, Vec<u8>),
    NotificationState(String, CharacteristicHandle, bool),
    Advertisement(ScanResult),
}

/// Where events are delivered
#[derive(Default)]
pub(crate) struct Routes {
    listeners: HashMap<String, Weak<dyn PeripheralListener>>,
    scan_sink: Option<ScanSink>,
}

impl Routes {
    pub fn register(&mut self, peripheral: &str, listener: Weak<dyn PeripheralListener>) {
        self.listeners.insert(peripheral.to_string(), listener);
    }

    pub fn unregister(&mut self, peripheral: &str) {
        self.listeners.remove(peripheral);
    }

    pub fn set_scan_sink(&mut self, sink: Option<ScanSink>) {
        self.scan_sink = sink;
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_sink.is_some()
    }

    fn listener(&self, peripheral: &str) -> Option<Arc<dyn PeripheralListener>> {
        self.listeners.get(peripheral).and_then(Weak::upgrade)
    }
}

impl PlatformEvent {
    fn peripheral(&self) -> Option<&str> {
        match self {
            PlatformEvent::Connected(id, _)
            | PlatformEvent::Disconnected(id)
            | PlatformEvent::Read(id, ..)
            | PlatformEvent::Write(id, ..)
            | PlatformEvent::Notify(id, ..)
            | PlatformEvent::NotificationState(id, ..) => Some(id.as_str()),
            PlatformEvent::Advertisement(_) => None,
        }
    }
}

/// Deliver one event; the routes lock is released before any callback runs
pub(crate) fn dispatch(routes: &Mutex<Routes>, event: PlatformEvent) {
    let Some(peripheral) = event.peripheral() else {
        let sink = routes.lock().scan_sink.clone();
        if let (Some(sink), PlatformEvent::Advertisement(result)) = (sink, event) {
            sink(result);
        }
        return;
    };

    let Some(listener) = routes.lock().listener(peripheral) else {
        trace!("No listener for {}, dropping {:?}", peripheral, event);
        return;
    };

    match event {
        PlatformEvent::Connected(_, result) => listener.on_connect(result),
        PlatformEvent::Disconnected(_) => listener.on_disconnect(),
        PlatformEvent::Read(_, handle, result) => listener.on_read(handle, result),
        PlatformEvent::Write(_, handle, result) => listener.on_write(handle, result),
        PlatformEvent::Notify(_, handle, value) => listener.on_notify(handle, value),
        PlatformEvent::NotificationState(_, handle, success) => {
            listener.on_notification_state(handle, success)
        }
        PlatformEvent::Advertisement(_) => {}
    }
}

/// Drain `events` until every sender is gone
pub(crate) async fn run_dispatcher(
    routes: Arc<Mutex<Routes>>,
    mut events: mpsc::UnboundedReceiver<PlatformEvent>,
) {
    while let Some(event) = events.recv().await {
        dispatch(&routes, event);
    }
    debug!("Event dispatcher stopped");
}
