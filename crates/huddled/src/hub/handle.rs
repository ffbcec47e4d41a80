//! Client interface for interacting with the HubActor.
//!
//! The `HubHandle` provides a cheap-to-clone interface for sending commands
//! to the hub actor and subscribing to lifecycle events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `HubError::ChannelClosed`
//! - Read queries degrade to empty/absent results when the actor is gone

use std::collections::BTreeSet;

use tokio::sync::{broadcast, mpsc, oneshot};

use huddle_core::{ConnectionId, DisconnectReason, GroupName, SessionState, Username};

use super::commands::{HubCommand, HubError, HubEvent};
use crate::router::DeliveryReport;

// ============================================================================
// Hub Handle
// ============================================================================

/// Handle for interacting with the hub actor.
///
/// This is a cheap-to-clone handle that can be shared across connection
/// tasks. Each method sends one command and awaits its reply, so a single
/// task calling these in sequence sees its own operations applied in order.
#[derive(Clone)]
pub struct HubHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<HubCommand>,

    /// Event broadcaster for subscribing to lifecycle events
    event_sender: broadcast::Sender<HubEvent>,
}

impl HubHandle {
    /// Create a new hub handle.
    pub fn new(sender: mpsc::Sender<HubCommand>, event_sender: broadcast::Sender<HubEvent>) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Sends a command built around a fresh oneshot and awaits the reply.
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> HubCommand,
    ) -> Result<R, HubError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Reports a newly opened connection.
    ///
    /// # Errors
    ///
    /// - `HubError::ConnectionExists` if the handle is already live
    /// - `HubError::HandleRetired` if the handle was already used
    /// - `HubError::HubFull` if the hub is at capacity
    /// - `HubError::ChannelClosed` if the actor has shut down
    pub async fn connect(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.request(|respond_to| HubCommand::Connect {
            connection_id,
            respond_to,
        })
        .await?
    }

    /// Reports a closed connection. No further operations are accepted for
    /// `connection_id` afterwards.
    ///
    /// # Errors
    ///
    /// - `HubError::UnknownConnection` if the handle is not live
    /// - `HubError::ChannelClosed` if the actor has shut down
    pub async fn disconnect(
        &self,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    ) -> Result<(), HubError> {
        self.request(|respond_to| HubCommand::Disconnect {
            connection_id,
            reason,
            respond_to,
        })
        .await?
    }

    /// Claims `name` for `connection_id`; returns the name it held before.
    ///
    /// A connection already holding `name` is demoted to anonymous.
    ///
    /// # Errors
    ///
    /// - `HubError::Validation` if `name` is empty or malformed
    /// - `HubError::UnknownConnection` if the handle is not live
    pub async fn set_identity(
        &self,
        connection_id: ConnectionId,
        name: impl Into<String>,
    ) -> Result<Option<Username>, HubError> {
        let name = name.into();
        self.request(|respond_to| HubCommand::SetIdentity {
            connection_id,
            name,
            respond_to,
        })
        .await?
    }

    /// Joins `group`; returns `false` if already a member.
    pub async fn join_group(
        &self,
        connection_id: ConnectionId,
        group: impl Into<String>,
    ) -> Result<bool, HubError> {
        let group = group.into();
        self.request(|respond_to| HubCommand::JoinGroup {
            connection_id,
            group,
            respond_to,
        })
        .await?
    }

    /// Leaves `group`; returns `false` if not a member.
    pub async fn leave_group(
        &self,
        connection_id: ConnectionId,
        group: impl Into<String>,
    ) -> Result<bool, HubError> {
        let group = group.into();
        self.request(|respond_to| HubCommand::LeaveGroup {
            connection_id,
            group,
            respond_to,
        })
        .await?
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Sends `message` to every live connection, sender included.
    pub async fn send_broadcast(
        &self,
        connection_id: ConnectionId,
        message: impl Into<String>,
    ) -> Result<DeliveryReport, HubError> {
        let message = message.into();
        self.request(|respond_to| HubCommand::SendBroadcast {
            connection_id,
            message,
            respond_to,
        })
        .await?
    }

    /// Sends a private message to the user named `to`.
    ///
    /// # Errors
    ///
    /// - `HubError::SenderAnonymous` if the sender has no identity
    /// - `HubError::RecipientNotConnected` if nobody holds `to`
    /// - `HubError::DeliveryFailed` if the recipient could not be reached
    pub async fn send_direct(
        &self,
        connection_id: ConnectionId,
        to: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<ConnectionId, HubError> {
        let to = to.into();
        let message = message.into();
        self.request(|respond_to| HubCommand::SendDirect {
            connection_id,
            to,
            message,
            respond_to,
        })
        .await?
    }

    /// Sends `message` to the members of `group`.
    pub async fn send_group(
        &self,
        connection_id: ConnectionId,
        group: impl Into<String>,
        message: impl Into<String>,
        exclude_self: bool,
    ) -> Result<DeliveryReport, HubError> {
        let group = group.into();
        let message = message.into();
        self.request(|respond_to| HubCommand::SendGroup {
            connection_id,
            group,
            message,
            exclude_self,
            respond_to,
        })
        .await?
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Connection currently holding `name`, if any.
    pub async fn lookup(&self, name: &Username) -> Option<ConnectionId> {
        let name = name.clone();
        self.request(|respond_to| HubCommand::Lookup { name, respond_to })
            .await
            .ok()
            .flatten()
    }

    /// Name currently held by `connection_id`, if any.
    pub async fn current_name(&self, connection_id: ConnectionId) -> Option<Username> {
        self.request(|respond_to| HubCommand::CurrentName {
            connection_id,
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// Sorted snapshot of every claimed name.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn all_names(&self) -> Vec<Username> {
        self.request(|respond_to| HubCommand::AllNames { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Snapshot of `group`'s members.
    pub async fn members(&self, group: &GroupName) -> BTreeSet<ConnectionId> {
        let group = group.clone();
        self.request(|respond_to| HubCommand::Members { group, respond_to })
            .await
            .unwrap_or_default()
    }

    /// Lifecycle state of `connection_id`.
    ///
    /// Unknown handles, and every handle once the actor is gone, are `Closed`.
    pub async fn connection_state(&self, connection_id: ConnectionId) -> SessionState {
        self.request(|respond_to| HubCommand::ConnectionState {
            connection_id,
            respond_to,
        })
        .await
        .unwrap_or(SessionState::Closed)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.request(|respond_to| HubCommand::ConnectionCount { respond_to })
            .await
            .unwrap_or_default()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true while the actor is still accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
