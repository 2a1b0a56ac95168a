//! GATT characteristic handle and its operation engine
//!
//! Acknowledged operations (read, write, enable notifications) are queued and
//! dispatched one at a time; each handler fires exactly once, in submission
//! order. Unacknowledged writes bypass the queue and resolve before returning.
//! Disabling notifications is queued behind earlier toggles but resolves as
//! soon as it is dispatched, since the platform never acknowledges it.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionShared;
use crate::engine::{wait_for, Dispatch, OperationKind, OperationQueue, PendingOperation};
use crate::error::{GattError, Result};
use crate::platform::{CharacteristicHandle, PeripheralHandle, PlatformError};

/// Standing handler for value-changed events
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Default)]
struct CharacteristicState {
    queue: OperationQueue,
    notification_handler: Option<NotificationHandler>,
    notifications_enabled: bool,
    /// Set when the link drops; submissions fail until the next connect
    closed: bool,
}

/// A characteristic discovered on a connected peripheral
///
/// Obtained from [`Connection::find_characteristic`](crate::Connection::find_characteristic);
/// one instance exists per UUID per connection.
pub struct Characteristic {
    uuid: Uuid,
    service_uuid: Uuid,
    handle: CharacteristicHandle,
    connection: Weak<ConnectionShared>,
    state: Mutex<CharacteristicState>,
}

impl Characteristic {
    pub(crate) fn new(
        uuid: Uuid,
        service_uuid: Uuid,
        handle: CharacteristicHandle,
        connection: Weak<ConnectionShared>,
    ) -> Self {
        Self {
            uuid,
            service_uuid,
            handle,
            connection,
            state: Mutex::new(CharacteristicState::default()),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// UUID of the service this characteristic was found in
    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    pub fn handle(&self) -> CharacteristicHandle {
        self.handle
    }

    /// Whether the owning connection is alive and connected
    pub fn is_connected(&self) -> bool {
        self.connection
            .upgrade()
            .map(|connection| connection.is_connected())
            .unwrap_or(false)
    }

    /// Operations queued or in flight
    pub fn pending_operations(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.state.lock().notifications_enabled
    }

    // ------------------------------------------------------------------------
    // Callback API
    // ------------------------------------------------------------------------

    /// Read the current value
    pub fn read_async<F>(&self, handler: F)
    where
        F: FnOnce(Result<Vec<u8>>) + Send + 'static,
    {
        self.submit(|sequence| PendingOperation::read(sequence, Box::new(handler)));
    }

    /// Write `value`, waiting for the remote acknowledgement
    pub fn write_async<F>(&self, value: &[u8], handler: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let value = value.to_vec();
        self.submit(|sequence| {
            PendingOperation::status(sequence, OperationKind::Write, value, Box::new(handler))
        });
    }

    /// Write `value` without acknowledgement
    ///
    /// The handler runs before this returns. The write is not ordered against
    /// queued acknowledged operations.
    pub fn write_without_response_async<F>(&self, value: &[u8], handler: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let connection = match self.live_connection() {
            Ok(connection) => connection,
            Err(e) => return handler(Err(e)),
        };
        let Some(peripheral) = connection.peripheral() else {
            return handler(Err(GattError::NotConnected));
        };
        self.issue(&connection, &peripheral, OperationKind::WriteNoResponse, value);
        handler(Ok(()))
    }

    /// Subscribe to value-changed events
    ///
    /// Fails with [`GattError::Notification`] if the remote device rejects
    /// the subscription.
    pub fn enable_notifications_async<F>(&self, handler: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(|sequence| {
            PendingOperation::status(
                sequence,
                OperationKind::EnableNotify,
                Vec::new(),
                Box::new(handler),
            )
        });
    }

    /// Unsubscribe; resolves once the request is issued, not acknowledged
    pub fn disable_notifications_async<F>(&self, handler: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(|sequence| {
            PendingOperation::status(
                sequence,
                OperationKind::DisableNotify,
                Vec::new(),
                Box::new(handler),
            )
        });
    }

    /// Register the standing value-changed handler; the last one wins
    ///
    /// Values are delivered only while notifications are enabled, so nothing
    /// received between a disable and the next successful enable reaches it.
    pub fn on_notification_received<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.state.lock().notification_handler = Some(Arc::new(handler));
    }

    // ------------------------------------------------------------------------
    // Async API
    // ------------------------------------------------------------------------

    pub async fn read(&self) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.read_async(move |result| {
            let _ = tx.send(result);
        });
        wait_for("read", self.operation_timeout(), rx).await
    }

    pub async fn write(&self, value: &[u8]) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.write_async(value, move |result| {
            let _ = tx.send(result);
        });
        wait_for("write", self.operation_timeout(), rx).await
    }

    pub async fn write_without_response(&self, value: &[u8]) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.write_without_response_async(value, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(GattError::NotConnected))
    }

    pub async fn enable_notifications(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.enable_notifications_async(move |result| {
            let _ = tx.send(result);
        });
        wait_for("enable notifications", self.operation_timeout(), rx).await
    }

    pub async fn disable_notifications(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.disable_notifications_async(move |result| {
            let _ = tx.send(result);
        });
        wait_for("disable notifications", self.operation_timeout(), rx).await
    }

    /// Stream of notification values; replaces the standing handler
    pub fn notifications(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_notification_received(move |value| {
            let _ = tx.send(value.to_vec());
        });
        rx
    }

    // ------------------------------------------------------------------------
    // Engine
    // ------------------------------------------------------------------------

    fn operation_timeout(&self) -> Option<std::time::Duration> {
        self.connection
            .upgrade()
            .and_then(|connection| connection.operation_timeout())
    }

    fn live_connection(&self) -> Result<Arc<ConnectionShared>> {
        let connection = self.connection.upgrade().ok_or(GattError::NotConnected)?;
        if !connection.is_connected() {
            return Err(GattError::NotConnected);
        }
        Ok(connection)
    }

    fn submit(&self, operation: impl FnOnce(u64) -> PendingOperation) {
        let connection = match self.live_connection() {
            Ok(connection) => connection,
            Err(e) => return operation(0).fail(e),
        };

        let operation = operation(connection.next_sequence());
        debug!("Queueing {} on {} (#{})", operation.kind(), self.uuid, operation.sequence());
        let rejected = {
            let mut state = self.state.lock();
            if state.closed {
                Some(operation)
            } else {
                state.queue.push(operation);
                None
            }
        };

        // The link dropped after the connected check; teardown already ran
        if let Some(operation) = rejected {
            return operation.fail(GattError::NotConnected);
        }
        self.pump(&connection);
    }

    /// Dispatch queued work until an acknowledged operation holds the slot
    fn pump(&self, connection: &ConnectionShared) {
        loop {
            if !connection.is_connected() {
                return;
            }

            let next = self.state.lock().queue.next_dispatch();
            match next {
                None => return,
                Some(Dispatch::Issue { kind, value }) => match connection.peripheral() {
                    Some(peripheral) => {
                        self.issue(connection, &peripheral, kind, &value);
                        return;
                    }
                    None => {
                        let orphan = self.state.lock().queue.complete(kind);
                        if let Some(operation) = orphan {
                            operation.fail(GattError::NotConnected);
                        }
                    }
                },
                Some(Dispatch::Detached(operation)) => match connection.peripheral() {
                    Some(peripheral) => {
                        self.issue(connection, &peripheral, operation.kind(), operation.value());
                        operation.succeed(Vec::new());
                    }
                    None => operation.fail(GattError::NotConnected),
                },
            }
        }
    }

    fn issue(
        &self,
        connection: &ConnectionShared,
        peripheral: &PeripheralHandle,
        kind: OperationKind,
        value: &[u8],
    ) {
        let platform = connection.platform();

        debug!("Dispatching {} on {} ({} bytes)", kind, self.uuid, value.len());
        match kind {
            OperationKind::Read => platform.read(peripheral, self.handle),
            OperationKind::Write => platform.write(peripheral, self.handle, value),
            OperationKind::WriteNoResponse => {
                platform.write_without_response(peripheral, self.handle, value)
            }
            OperationKind::EnableNotify => platform.set_notify(peripheral, self.handle, true),
            OperationKind::DisableNotify => {
                self.state.lock().notifications_enabled = false;
                platform.set_notify(peripheral, self.handle, false);
            }
        }
    }

    /// Resolve a completed operation, then move the queue along
    fn finish(
        &self,
        kind: OperationKind,
        operation: Option<PendingOperation>,
        resolve: impl FnOnce(PendingOperation),
    ) {
        let Some(operation) = operation else {
            warn!("Ignoring {} completion on {} with no matching operation in flight", kind, self.uuid);
            return;
        };

        debug!("Completed {} on {} (#{})", kind, self.uuid, operation.sequence());
        resolve(operation);

        if let Some(connection) = self.connection.upgrade() {
            self.pump(&connection);
        }
    }

    pub(crate) fn complete_read(&self, result: std::result::Result<Vec<u8>, PlatformError>) {
        let uuid = self.uuid;
        let operation = self.state.lock().queue.complete(OperationKind::Read);
        self.finish(OperationKind::Read, operation, move |operation| match result {
            Ok(data) => operation.succeed(data),
            Err(e) => operation.fail(GattError::Operation {
                characteristic: uuid,
                reason: e.to_string(),
            }),
        });
    }

    pub(crate) fn complete_write(&self, result: std::result::Result<(), PlatformError>) {
        let uuid = self.uuid;
        let operation = self.state.lock().queue.complete(OperationKind::Write);
        self.finish(OperationKind::Write, operation, move |operation| match result {
            Ok(()) => operation.succeed(Vec::new()),
            Err(e) => operation.fail(GattError::Operation {
                characteristic: uuid,
                reason: e.to_string(),
            }),
        });
    }

    pub(crate) fn complete_notification_state(&self, success: bool) {
        let uuid = self.uuid;
        let operation = {
            let mut state = self.state.lock();
            let operation = state.queue.complete(OperationKind::EnableNotify);
            // Delivery turns on before the enable handler runs
            if operation.is_some() && success {
                state.notifications_enabled = true;
            }
            operation
        };
        self.finish(OperationKind::EnableNotify, operation, move |operation| {
            if success {
                operation.succeed(Vec::new());
            } else {
                operation.fail(GattError::Notification { characteristic: uuid });
            }
        });
    }

    pub(crate) fn deliver_notification(&self, value: &[u8]) {
        let handler = {
            let state = self.state.lock();
            if state.notifications_enabled {
                state.notification_handler.clone()
            } else {
                None
            }
        };

        match handler {
            Some(handler) => handler(value),
            None => debug!("Dropping notification on {} ({} bytes)", self.uuid, value.len()),
        }
    }

    /// Take every pending operation, turn delivery off and refuse new
    /// submissions until [`reopen`](Self::reopen); used on link loss
    pub(crate) fn drain_pending(&self) -> Vec<PendingOperation> {
        let mut state = self.state.lock();
        state.notifications_enabled = false;
        state.closed = true;
        state.queue.drain()
    }

    /// Accept submissions again after a reconnect
    pub(crate) fn reopen(&self) {
        self.state.lock().closed = false;
    }
}

impl std::fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Characteristic")
            .field("uuid", &self.uuid)
            .field("service_uuid", &self.service_uuid)
            .field("handle", &self.handle)
            .finish()
    }
}
