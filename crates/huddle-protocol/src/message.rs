//! Protocol message types for hub communication.
//!
//! Inbound fields carry raw strings; name validation happens in the hub so a
//! bad name is reported as a validation error rather than a parse failure.

use crate::version::ProtocolVersion;
use huddle_core::{ConnectionId, GroupName, Username};
use serde::{Deserialize, Serialize};

/// Message types that can be sent by clients to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake
    Connect,

    /// Claim a display identity
    SetIdentity { name: String },

    /// Send a message to every connected client
    SendBroadcast { message: String },

    /// Send a private message to one named user
    SendDirect { to: String, message: String },

    /// Join a group
    JoinGroup { group: String },

    /// Leave a group
    LeaveGroup { group: String },

    /// Send a message to every member of a group
    SendGroup {
        group: String,
        message: String,
        /// Skip delivering the message back to the sender
        #[serde(default)]
        exclude_self: bool,
    },

    /// Request the current presence list
    ListUsers,

    /// Ping to check connection
    Ping { seq: u64 },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect() -> Self {
        Self::new(MessageType::Connect)
    }

    pub fn set_identity(name: impl Into<String>) -> Self {
        Self::new(MessageType::SetIdentity { name: name.into() })
    }

    pub fn send_broadcast(message: impl Into<String>) -> Self {
        Self::new(MessageType::SendBroadcast {
            message: message.into(),
        })
    }

    pub fn send_direct(to: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(MessageType::SendDirect {
            to: to.into(),
            message: message.into(),
        })
    }

    pub fn join_group(group: impl Into<String>) -> Self {
        Self::new(MessageType::JoinGroup {
            group: group.into(),
        })
    }

    pub fn leave_group(group: impl Into<String>) -> Self {
        Self::new(MessageType::LeaveGroup {
            group: group.into(),
        })
    }

    pub fn send_group(group: impl Into<String>, message: impl Into<String>, exclude_self: bool) -> Self {
        Self::new(MessageType::SendGroup {
            group: group.into(),
            message: message.into(),
            exclude_self,
        })
    }

    pub fn list_users() -> Self {
        Self::new(MessageType::ListUsers)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Stable error codes carried by [`HubMessage::Error`].
pub mod error_code {
    pub const VALIDATION: &str = "validation";
    pub const NOT_FOUND: &str = "not_found";
    pub const SENDER_ANONYMOUS: &str = "sender_anonymous";
    pub const DELIVERY_FAILED: &str = "delivery_failed";
    pub const INVALID_MESSAGE: &str = "invalid_message";
    pub const INTERNAL: &str = "internal";
}

/// Messages sent from the hub to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// Handshake accepted
    Connected {
        protocol_version: ProtocolVersion,
        connection_id: ConnectionId,
    },

    /// Handshake rejected (version mismatch, hub full)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Caller's identity claim succeeded
    IdentitySet { name: Username },

    /// Current set of named users (presence)
    UserList { users: Vec<Username> },

    /// Broadcast chat message
    Message { from: String, message: String },

    /// Private message delivered to its recipient
    PrivateMessage { from: Username, message: String },

    /// Confirmation echoed to the sender of a private message
    PrivateMessageSent {
        from: Username,
        to: Username,
        message: String,
    },

    /// Message addressed to a group (including join/leave notices)
    GroupMessage {
        group: GroupName,
        from: String,
        message: String,
    },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response, sent only to the originating client
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl HubMessage {
    pub fn connected(connection_id: ConnectionId) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            connection_id,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn identity_set(name: Username) -> Self {
        Self::IdentitySet { name }
    }

    pub fn user_list(users: Vec<Username>) -> Self {
        Self::UserList { users }
    }

    pub fn message(from: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Message {
            from: from.into(),
            message: message.into(),
        }
    }

    pub fn private_message(from: Username, message: impl Into<String>) -> Self {
        Self::PrivateMessage {
            from,
            message: message.into(),
        }
    }

    pub fn private_message_sent(from: Username, to: Username, message: impl Into<String>) -> Self {
        Self::PrivateMessageSent {
            from,
            to,
            message: message.into(),
        }
    }

    pub fn group_message(group: GroupName, from: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GroupMessage {
            group,
            from: from.into(),
            message: message.into(),
        }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }

    /// Event name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Rejected { .. } => "rejected",
            Self::IdentitySet { .. } => "identity_set",
            Self::UserList { .. } => "user_list",
            Self::Message { .. } => "message",
            Self::PrivateMessage { .. } => "private_message",
            Self::PrivateMessageSent { .. } => "private_message_sent",
            Self::GroupMessage { .. } => "group_message",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }
}
