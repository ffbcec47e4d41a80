//! Transport contract consumed by the hub.
//!
//! The hub never owns sockets. Whatever carries bytes to clients implements
//! [`Transport`] and reports connect/disconnect through
//! [`HubHandle`](crate::hub::HubHandle).

use std::sync::Arc;

use huddle_core::ConnectionId;
use huddle_protocol::HubMessage;
use thiserror::Error;

/// Best-effort unicast to one connection.
///
/// Implementations must not block: the hub actor calls `send` while
/// processing a command, and a slow client must not stall everyone else.
pub trait Transport: Send + Sync + 'static {
    /// Delivers `message` to `to`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the connection could not be reached
    /// at send time.
    fn send(&self, to: ConnectionId, message: &HubMessage) -> Result<(), DeliveryError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, to: ConnectionId, message: &HubMessage) -> Result<(), DeliveryError> {
        (**self).send(to, message)
    }
}

/// Why a single delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The transport has no live endpoint for this handle.
    #[error("connection {0} is not reachable")]
    Unreachable(ConnectionId),

    /// The endpoint exists but its outbound buffer is full.
    #[error("outbox for {0} is full")]
    Backpressure(ConnectionId),
}
