//! Per-characteristic GATT operation queue
//!
//! A BLE link serializes reads, writes and subscription changes on one
//! attribute, so each characteristic owns a FIFO of [`PendingOperation`]s of
//! which at most one is in flight. The queue is pure bookkeeping: it decides
//! what to dispatch next and which operation a completion belongs to, while
//! `Characteristic` talks to the platform and invokes handlers with no lock
//! held.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::GattError;

/// Completion handler for reads
pub type ReadHandler = Box<dyn FnOnce(Result<Vec<u8>, GattError>) + Send>;

/// Completion handler for writes, subscription toggles and connects
pub type StatusHandler = Box<dyn FnOnce(Result<(), GattError>) + Send>;

// ----------------------------------------------------------------------------
// Pending Operations
// ----------------------------------------------------------------------------

/// Kind of queued GATT operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    WriteNoResponse,
    EnableNotify,
    DisableNotify,
}

impl OperationKind {
    /// Whether the platform reports completion for this kind
    ///
    /// Only acknowledged kinds occupy the in-flight slot.
    pub fn is_acknowledged(self) -> bool {
        matches!(
            self,
            OperationKind::Read | OperationKind::Write | OperationKind::EnableNotify
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::WriteNoResponse => "write without response",
            OperationKind::EnableNotify => "enable notifications",
            OperationKind::DisableNotify => "disable notifications",
        };
        f.write_str(name)
    }
}

pub(crate) enum Completion {
    Data(ReadHandler),
    Status(StatusHandler),
}

/// A request waiting for, or holding, the characteristic's in-flight slot
///
/// The handler is invoked exactly once: on completion, on failure, or when
/// the connection is torn down.
pub struct PendingOperation {
    sequence: u64,
    kind: OperationKind,
    value: Vec<u8>,
    completion: Completion,
}

impl PendingOperation {
    pub(crate) fn read(sequence: u64, handler: ReadHandler) -> Self {
        Self {
            sequence,
            kind: OperationKind::Read,
            value: Vec::new(),
            completion: Completion::Data(handler),
        }
    }

    pub(crate) fn status(
        sequence: u64,
        kind: OperationKind,
        value: Vec<u8>,
        handler: StatusHandler,
    ) -> Self {
        Self {
            sequence,
            kind,
            value,
            completion: Completion::Status(handler),
        }
    }

    /// Connection-wide submission order
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Bytes to send for writes; empty for other kinds
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Resolve a read with data, or any other kind with success
    pub(crate) fn succeed(self, data: Vec<u8>) {
        match self.completion {
            Completion::Data(handler) => handler(Ok(data)),
            Completion::Status(handler) => handler(Ok(())),
        }
    }

    pub(crate) fn fail(self, error: GattError) {
        match self.completion {
            Completion::Data(handler) => handler(Err(error)),
            Completion::Status(handler) => handler(Err(error)),
        }
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("sequence", &self.sequence)
            .field("kind", &self.kind)
            .field("value_len", &self.value.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Operation Queue
// ----------------------------------------------------------------------------

/// What the characteristic must do next
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// Issue this acknowledged primitive; the operation now holds the slot
    Issue { kind: OperationKind, value: Vec<u8> },
    /// Issue this unacknowledged primitive, then resolve the operation
    Detached(PendingOperation),
}

#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    pending: VecDeque<PendingOperation>,
    in_flight: bool,
}

impl OperationQueue {
    pub fn push(&mut self, operation: PendingOperation) {
        self.pending.push_back(operation);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> Option<OperationKind> {
        if self.in_flight {
            self.pending.front().map(PendingOperation::kind)
        } else {
            None
        }
    }

    /// Next step, if the slot is free and work is queued
    pub fn next_dispatch(&mut self) -> Option<Dispatch> {
        if self.in_flight {
            return None;
        }
        let head = self.pending.front()?;
        if head.kind.is_acknowledged() {
            self.in_flight = true;
            Some(Dispatch::Issue {
                kind: head.kind,
                value: head.value.clone(),
            })
        } else {
            self.pending.pop_front().map(Dispatch::Detached)
        }
    }

    /// Take the in-flight operation if it is of `kind`
    ///
    /// `None` means the completion matches nothing outstanding and must be
    /// ignored.
    pub fn complete(&mut self, kind: OperationKind) -> Option<PendingOperation> {
        if self.in_flight() != Some(kind) {
            return None;
        }
        self.in_flight = false;
        self.pending.pop_front()
    }

    /// Remove every operation, in FIFO order
    pub fn drain(&mut self) -> Vec<PendingOperation> {
        self.in_flight = false;
        self.pending.drain(..).collect()
    }
}

/// Await a handler-delivered result, bounded by `deadline` when set
///
/// A dropped sender means the handler was discarded with its connection.
pub(crate) async fn wait_for<T>(
    operation: &'static str,
    deadline: Option<Duration>,
    receiver: oneshot::Receiver<Result<T, GattError>>,
) -> Result<T, GattError> {
    let outcome = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, receiver)
            .await
            .map_err(|_| GattError::Timeout { operation })?,
        None => receiver.await,
    };
    outcome.unwrap_or(Err(GattError::ConnectionLost))
}
