//! Hub actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `HubActor`:
//! - `HubCommand`: Commands sent to the actor
//! - `HubError`: Errors reported back to the originating caller
//! - `HubEvent`: Lifecycle events published for in-process observers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::collections::BTreeSet;

use huddle_core::{ConnectionId, DisconnectReason, DomainError, GroupName, SessionState, Username};
use huddle_protocol::error_code;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::router::DeliveryReport;
use crate::transport::DeliveryError;

// ============================================================================
// Hub Commands
// ============================================================================

/// Commands sent to the hub actor.
///
/// Mutating commands carry raw strings; the actor validates them before
/// touching any state. Each command uses a oneshot channel for the response.
#[derive(Debug)]
pub enum HubCommand {
    /// Transport opened a connection.
    ///
    /// # Errors
    /// - `HubError::ConnectionExists` if the handle is already live
    /// - `HubError::HandleRetired` if the handle is not above every handle
    ///   accepted so far
    /// - `HubError::HubFull` if at maximum capacity
    Connect {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Transport closed a connection. Terminal for that handle.
    ///
    /// # Errors
    /// - `HubError::UnknownConnection` if the handle is not live
    Disconnect {
        connection_id: ConnectionId,
        reason: DisconnectReason,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Claim a display identity, last claimant wins.
    ///
    /// Responds with the name previously held by this connection.
    SetIdentity {
        connection_id: ConnectionId,
        name: String,
        respond_to: oneshot::Sender<Result<Option<Username>, HubError>>,
    },

    /// Join a group. Responds `false` if already a member.
    JoinGroup {
        connection_id: ConnectionId,
        group: String,
        respond_to: oneshot::Sender<Result<bool, HubError>>,
    },

    /// Leave a group. Responds `false` if not a member.
    LeaveGroup {
        connection_id: ConnectionId,
        group: String,
        respond_to: oneshot::Sender<Result<bool, HubError>>,
    },

    /// Send a message to every live connection.
    SendBroadcast {
        connection_id: ConnectionId,
        message: String,
        respond_to: oneshot::Sender<Result<DeliveryReport, HubError>>,
    },

    /// Send a private message to a named user.
    ///
    /// # Errors
    /// - `HubError::SenderAnonymous` if the sender has no identity
    /// - `HubError::RecipientNotConnected` if nobody holds the target name
    /// - `HubError::DeliveryFailed` if the recipient could not be reached
    SendDirect {
        connection_id: ConnectionId,
        to: String,
        message: String,
        respond_to: oneshot::Sender<Result<ConnectionId, HubError>>,
    },

    /// Send a message to a group's members.
    SendGroup {
        connection_id: ConnectionId,
        group: String,
        message: String,
        exclude_self: bool,
        respond_to: oneshot::Sender<Result<DeliveryReport, HubError>>,
    },

    /// Connection currently holding a name.
    Lookup {
        name: Username,
        respond_to: oneshot::Sender<Option<ConnectionId>>,
    },

    /// Name currently held by a connection.
    CurrentName {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<Username>>,
    },

    /// Sorted snapshot of every claimed name.
    AllNames {
        respond_to: oneshot::Sender<Vec<Username>>,
    },

    /// Snapshot of a group's members.
    Members {
        group: GroupName,
        respond_to: oneshot::Sender<BTreeSet<ConnectionId>>,
    },

    /// Lifecycle state of a connection (`Closed` once it is gone).
    ConnectionState {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<SessionState>,
    },

    /// Number of live connections.
    ConnectionCount {
        respond_to: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Hub Errors
// ============================================================================

/// Errors reported to the caller of a hub operation.
///
/// None of these affect other connections.
#[derive(Debug, Clone, Error)]
pub enum HubError {
    /// A name failed validation. Nothing was changed.
    #[error(transparent)]
    Validation(#[from] DomainError),

    /// No connection currently holds the target identity.
    #[error("User '{0}' is not connected")]
    RecipientNotConnected(Username),

    /// Private messages require the sender to have claimed an identity.
    #[error("Sender has not set a username")]
    SenderAnonymous,

    /// The single recipient of a direct message could not be reached.
    #[error("delivery failed: {0}")]
    DeliveryFailed(DeliveryError),

    /// The handle is not a live connection (never connected, or closed).
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The transport reported a connect for a handle that is already live.
    #[error("connection already registered: {0}")]
    ConnectionExists(ConnectionId),

    /// The handle was used by an earlier connection and cannot be reopened.
    #[error("connection handle already used: {0}")]
    HandleRetired(ConnectionId),

    /// The hub has reached its connection capacity.
    #[error("hub is full (max: {max} connections)")]
    HubFull { max: usize },

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("hub channel closed")]
    ChannelClosed,
}

impl HubError {
    /// Wire error code reported to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => error_code::VALIDATION,
            Self::RecipientNotConnected(_) => error_code::NOT_FOUND,
            Self::SenderAnonymous => error_code::SENDER_ANONYMOUS,
            Self::DeliveryFailed(_) => error_code::DELIVERY_FAILED,
            Self::UnknownConnection(_)
            | Self::ConnectionExists(_)
            | Self::HandleRetired(_)
            | Self::HubFull { .. }
            | Self::ChannelClosed => error_code::INTERNAL,
        }
    }
}

// ============================================================================
// Hub Events
// ============================================================================

/// Lifecycle events published by the hub for in-process observers.
///
/// Client-facing notifications go through the transport; these are for
/// logging, metrics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A connection entered `Anonymous`.
    Connected { connection_id: ConnectionId },

    /// A connection claimed an identity.
    IdentityClaimed {
        connection_id: ConnectionId,
        name: Username,
        previous: Option<Username>,
    },

    /// A connection lost its identity to a later claimant.
    Demoted {
        connection_id: ConnectionId,
        name: Username,
    },

    /// A connection entered `Closed`.
    Disconnected {
        connection_id: ConnectionId,
        name: Option<Username>,
        reason: DisconnectReason,
    },
}
