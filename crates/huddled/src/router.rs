//! Recipient selection and dispatch.
//!
//! The router is the only component that calls [`Transport::send`]. It
//! reads the registry and group table to compute recipients but never
//! mutates them.
//!
//! Delivery semantics:
//! - broadcast and group sends attempt every recipient independently; a
//!   failure is logged and recorded in the [`DeliveryReport`], never
//!   propagated
//! - a direct send has one recipient, so its failure is the caller's error

use huddle_core::{ConnectionId, GroupName, Username};
use huddle_protocol::HubMessage;
use tracing::debug;

use crate::groups::GroupTable;
use crate::hub::HubError;
use crate::registry::ConnectionRegistry;
use crate::transport::{DeliveryError, Transport};

/// Outcome of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Number of recipients the transport accepted the message for.
    pub delivered: usize,

    /// Recipients that could not be reached.
    pub failed: Vec<ConnectionId>,
}

impl DeliveryReport {
    /// Total recipients attempted.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Dispatches hub messages through a [`Transport`].
pub struct Router<T> {
    transport: T,
}

impl<T: Transport> Router<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Sends to a single connection, logging failures at debug.
    pub fn send_to(&self, to: ConnectionId, message: &HubMessage) -> Result<(), DeliveryError> {
        self.transport.send(to, message).map_err(|e| {
            debug!(
                connection_id = %to,
                kind = message.kind(),
                error = %e,
                "Delivery failed"
            );
            e
        })
    }

    /// Sends `message` to every recipient, isolating per-recipient failures.
    pub fn broadcast<I>(&self, recipients: I, message: &HubMessage) -> DeliveryReport
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let mut report = DeliveryReport::default();

        for id in recipients {
            match self.send_to(id, message) {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed.push(id),
            }
        }

        if !report.failed.is_empty() {
            debug!(
                kind = message.kind(),
                delivered = report.delivered,
                failed = report.failed.len(),
                "Fan-out completed with failures"
            );
        }

        report
    }

    /// Delivers a private message to the connection holding `target`, then
    /// echoes `echo` back to `sender`.
    ///
    /// # Errors
    ///
    /// - `HubError::RecipientNotConnected` if nobody holds `target`; nothing
    ///   is sent
    /// - `HubError::DeliveryFailed` if the target vanished before delivery;
    ///   no echo is sent
    pub fn send_direct(
        &self,
        registry: &ConnectionRegistry,
        sender: ConnectionId,
        target: &Username,
        delivery: &HubMessage,
        echo: &HubMessage,
    ) -> Result<ConnectionId, HubError> {
        let recipient = registry
            .lookup(target)
            .ok_or_else(|| HubError::RecipientNotConnected(target.clone()))?;

        self.send_to(recipient, delivery)
            .map_err(HubError::DeliveryFailed)?;

        // The message reached its target; a lost echo is the sender's problem.
        let _ = self.send_to(sender, echo);

        Ok(recipient)
    }

    /// Sends to every member of `group`, optionally skipping `exclude`.
    ///
    /// An empty or unknown group is a no-op, not an error.
    pub fn send_to_group(
        &self,
        groups: &GroupTable,
        group: &GroupName,
        message: &HubMessage,
        exclude: Option<ConnectionId>,
    ) -> DeliveryReport {
        let recipients = groups
            .members(group)
            .into_iter()
            .filter(|id| Some(*id) != exclude);

        self.broadcast(recipients, message)
    }
}
