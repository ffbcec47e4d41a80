//! Per-connection outbound queues.
//!
//! Every connection gets a bounded mpsc queue drained by its own writer
//! task. `Outboxes` is the [`Transport`] the hub actor sends through: a
//! `send` is a `try_send` into the target's queue, so a slow or dead client
//! costs the actor nothing beyond a failed delivery.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use huddle_core::ConnectionId;
use huddle_protocol::HubMessage;

use crate::transport::{DeliveryError, Transport};

/// Default per-connection queue depth.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Registry of live outbound queues keyed by connection.
pub struct Outboxes {
    capacity: usize,
    senders: RwLock<HashMap<ConnectionId, mpsc::Sender<HubMessage>>>,
}

impl Outboxes {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the queue for `id`.
    ///
    /// Returns a sender for the connection's own replies and the receiver
    /// its writer task drains.
    pub fn open(&self, id: ConnectionId) -> (mpsc::Sender<HubMessage>, mpsc::Receiver<HubMessage>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx.clone());
        (tx, rx)
    }

    /// Drops the hub's route to `id`. Idempotent.
    pub fn close(&self, id: ConnectionId) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Number of open queues.
    pub fn len(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Outboxes {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl Transport for Outboxes {
    fn send(&self, to: ConnectionId, message: &HubMessage) -> Result<(), DeliveryError> {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        let sender = senders.get(&to).ok_or(DeliveryError::Unreachable(to))?;

        sender.try_send(message.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure(to),
            TrySendError::Closed(_) => DeliveryError::Unreachable(to),
        })
    }
}
