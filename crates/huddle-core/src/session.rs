//! Connection session entities and lifecycle states.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ConnectionId, Username};

/// Display name used for connections that have not claimed an identity.
pub const ANONYMOUS: &str = "Anonymous";

/// Sender name used for hub-generated notices (joins, leaves).
pub const SYSTEM_SENDER: &str = "System";

// ============================================================================
// Lifecycle State
// ============================================================================

/// Lifecycle state of a connection.
///
/// ```text
/// Anonymous ──set_identity──▶ Named ──set_identity──▶ Named
///     │  ▲                      │
///     │  └─────── demoted ──────┘
///     │                         │
///     └──────disconnect─────────┴──────▶ Closed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "name", rename_all = "snake_case")]
pub enum SessionState {
    /// Connected, no identity claimed (or identity lost to a later claimant).
    Anonymous,

    /// Connected with a claimed identity.
    Named(Username),

    /// Transport reported disconnection. Terminal.
    Closed,
}

impl SessionState {
    /// Returns the claimed name, if any.
    pub fn name(&self) -> Option<&Username> {
        match self {
            Self::Named(name) => Some(name),
            Self::Anonymous | Self::Closed => None,
        }
    }

    /// Name shown to other parties: the claimed identity or [`ANONYMOUS`].
    pub fn display_name(&self) -> &str {
        self.name().map_or(ANONYMOUS, Username::as_str)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Short label for logs and status output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Named(_) => "named",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "named ({name})"),
            other => f.write_str(other.label()),
        }
    }
}

// ============================================================================
// Connection Entity
// ============================================================================

/// One live transport session as tracked by the hub.
///
/// Group memberships are not stored here; the group table keeps a reverse
/// index keyed by connection so a disconnect can clean up in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    /// Creates a freshly connected, anonymous session.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Anonymous,
            connected_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.state.display_name()
    }

    /// Time spent connected as of `now`, never negative.
    pub fn connected_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.connected_at).max(Duration::zero())
    }

    /// Moves to `Named`. Returns the name held before, if any.
    pub fn name(&mut self, name: Username) -> Option<Username> {
        match std::mem::replace(&mut self.state, SessionState::Named(name)) {
            SessionState::Named(previous) => Some(previous),
            SessionState::Anonymous | SessionState::Closed => None,
        }
    }

    /// Returns to `Anonymous` (identity claimed by another connection).
    pub fn demote(&mut self) {
        if !self.state.is_closed() {
            self.state = SessionState::Anonymous;
        }
    }

    /// Moves to the terminal `Closed` state.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

// ============================================================================
// Disconnect Reason
// ============================================================================

/// Why the transport ended a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Client sent an explicit disconnect message.
    ClientRequested,

    /// Peer closed the socket.
    Eof,

    /// No traffic within the idle read timeout.
    Timeout,

    /// Unrecoverable I/O or protocol error on the socket.
    TransportError,

    /// Server is shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientRequested => write!(f, "client requested disconnect"),
            Self::Eof => write!(f, "connection closed by peer"),
            Self::Timeout => write!(f, "idle timeout"),
            Self::TransportError => write!(f, "transport error"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}
