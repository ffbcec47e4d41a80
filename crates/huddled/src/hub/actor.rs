//! Hub actor - owns all connection state and drives the session lifecycle.
//!
//! The HubActor is the single owner of the connection table, the identity
//! registry and the group table. It receives commands via an mpsc channel,
//! processes them one at a time, and hands outbound messages to the router.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Response and event send failures are ignored, never fatal

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use huddle_core::{
    Connection, ConnectionId, DisconnectReason, GroupName, SessionState, Username, SYSTEM_SENDER,
};
use huddle_protocol::HubMessage;

use super::commands::{HubCommand, HubError, HubEvent};
use crate::groups::GroupTable;
use crate::registry::ConnectionRegistry;
use crate::router::{DeliveryReport, Router};
use crate::transport::Transport;

/// Default maximum number of simultaneous connections.
pub const MAX_CONNECTIONS: usize = 1024;

// ============================================================================
// Hub Actor
// ============================================================================

/// The hub actor - owns all session state.
///
/// # Ownership
///
/// The actor owns:
/// - `connections`: every live connection and its lifecycle state
/// - `registry`: username ⇄ connection bijection
/// - `groups`: group memberships with a reverse index
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially, so
/// every mutation is atomic and snapshot reads never see a half-applied
/// change. The transport's `send` must not block.
pub struct HubActor<T> {
    /// Command receiver
    receiver: mpsc::Receiver<HubCommand>,

    /// Live connections keyed by handle
    connections: HashMap<ConnectionId, Connection>,

    /// Identity claims
    registry: ConnectionRegistry,

    /// Group memberships
    groups: GroupTable,

    /// Outbound dispatch
    router: Router<T>,

    /// Lifecycle events for in-process observers
    event_publisher: broadcast::Sender<HubEvent>,

    /// Connection capacity
    max_connections: usize,

    /// Highest handle ever accepted; handles at or below it are retired
    highest_connected: Option<ConnectionId>,
}

impl<T: Transport> HubActor<T> {
    /// Creates a new hub actor.
    pub fn new(
        receiver: mpsc::Receiver<HubCommand>,
        event_publisher: broadcast::Sender<HubEvent>,
        transport: T,
        max_connections: usize,
    ) -> Self {
        Self {
            receiver,
            connections: HashMap::new(),
            registry: ConnectionRegistry::new(),
            groups: GroupTable::new(),
            router: Router::new(transport),
            event_publisher,
            max_connections,
            highest_connected: None,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!(max_connections = self.max_connections, "Hub actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            connections = self.connections.len(),
            named = self.registry.len(),
            groups = self.groups.group_count(),
            "Hub actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: HubCommand) {
        // Ignore response send errors - the caller may have dropped the receiver
        match cmd {
            HubCommand::Connect {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_connect(connection_id));
            }
            HubCommand::Disconnect {
                connection_id,
                reason,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_disconnect(connection_id, reason));
            }
            HubCommand::SetIdentity {
                connection_id,
                name,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_set_identity(connection_id, &name));
            }
            HubCommand::JoinGroup {
                connection_id,
                group,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_join_group(connection_id, &group));
            }
            HubCommand::LeaveGroup {
                connection_id,
                group,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_leave_group(connection_id, &group));
            }
            HubCommand::SendBroadcast {
                connection_id,
                message,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_send_broadcast(connection_id, message));
            }
            HubCommand::SendDirect {
                connection_id,
                to,
                message,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_send_direct(connection_id, &to, message));
            }
            HubCommand::SendGroup {
                connection_id,
                group,
                message,
                exclude_self,
                respond_to,
            } => {
                let result = self.handle_send_group(connection_id, &group, message, exclude_self);
                let _ = respond_to.send(result);
            }
            HubCommand::Lookup { name, respond_to } => {
                let _ = respond_to.send(self.registry.lookup(&name));
            }
            HubCommand::CurrentName {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.current_name(connection_id).cloned());
            }
            HubCommand::AllNames { respond_to } => {
                let _ = respond_to.send(self.registry.all_names());
            }
            HubCommand::Members { group, respond_to } => {
                let _ = respond_to.send(self.groups.members(&group));
            }
            HubCommand::ConnectionState {
                connection_id,
                respond_to,
            } => {
                let state = self
                    .connections
                    .get(&connection_id)
                    .map_or(SessionState::Closed, |conn| conn.state.clone());
                let _ = respond_to.send(state);
            }
            HubCommand::ConnectionCount { respond_to } => {
                let _ = respond_to.send(self.connections.len());
            }
        }
    }

    // ========================================================================
    // Lifecycle Handlers
    // ========================================================================

    /// Creates an `Anonymous` connection.
    fn handle_connect(&mut self, id: ConnectionId) -> Result<(), HubError> {
        if self.connections.contains_key(&id) {
            warn!(connection_id = %id, "Duplicate connect for live handle");
            return Err(HubError::ConnectionExists(id));
        }

        if self.highest_connected.is_some_and(|highest| id <= highest) {
            warn!(connection_id = %id, "Connect for a retired handle");
            return Err(HubError::HandleRetired(id));
        }

        if self.connections.len() >= self.max_connections {
            warn!(
                connection_id = %id,
                max = self.max_connections,
                "Hub is full, rejecting connection"
            );
            return Err(HubError::HubFull {
                max: self.max_connections,
            });
        }

        self.connections.insert(id, Connection::new(id));
        self.highest_connected = Some(id);

        info!(
            connection_id = %id,
            total_connections = self.connections.len(),
            "Connection opened"
        );

        let _ = self
            .event_publisher
            .send(HubEvent::Connected { connection_id: id });

        Ok(())
    }

    /// Moves a connection to `Closed` and removes every trace of it.
    fn handle_disconnect(
        &mut self,
        id: ConnectionId,
        reason: DisconnectReason,
    ) -> Result<(), HubError> {
        let mut conn = self
            .connections
            .remove(&id)
            .ok_or(HubError::UnknownConnection(id))?;
        conn.close();

        let name = self.registry.clear_identity(id);
        let left = self.groups.remove_everywhere(id);
        let connected_secs = conn.connected_for(Utc::now()).num_seconds();

        info!(
            connection_id = %id,
            name = ?name,
            groups_left = left.len(),
            connected_secs,
            reason = %reason,
            total_connections = self.connections.len(),
            "Connection closed"
        );

        if name.is_some() {
            self.broadcast_presence();
        }

        let _ = self.event_publisher.send(HubEvent::Disconnected {
            connection_id: id,
            name,
            reason,
        });

        Ok(())
    }

    /// Claims an identity for `id`, demoting any previous holder.
    fn handle_set_identity(
        &mut self,
        id: ConnectionId,
        raw_name: &str,
    ) -> Result<Option<Username>, HubError> {
        self.require_live(id)?;
        let name = Username::parse(raw_name)?;

        let claim = self.registry.set_identity(id, name.clone());

        if let Some(conn) = self.connections.get_mut(&id) {
            conn.name(name.clone());
        }

        if let Some(demoted) = claim.demoted {
            if let Some(conn) = self.connections.get_mut(&demoted) {
                conn.demote();
            }
            info!(
                connection_id = %demoted,
                name = %name,
                claimant = %id,
                "Connection demoted to anonymous"
            );
            let _ = self.event_publisher.send(HubEvent::Demoted {
                connection_id: demoted,
                name: name.clone(),
            });
        }

        info!(
            connection_id = %id,
            name = %name,
            previous = ?claim.previous,
            "Identity set"
        );

        let _ = self.router.send_to(id, &HubMessage::identity_set(name.clone()));
        self.broadcast_presence();

        let _ = self.event_publisher.send(HubEvent::IdentityClaimed {
            connection_id: id,
            name,
            previous: claim.previous.clone(),
        });

        Ok(claim.previous)
    }

    /// Adds `id` to a group and announces it to the members, joiner included.
    fn handle_join_group(&mut self, id: ConnectionId, raw_group: &str) -> Result<bool, HubError> {
        self.require_live(id)?;
        let group = GroupName::parse(raw_group)?;

        let added = self.groups.join(&group, id);
        if !added {
            debug!(connection_id = %id, group = %group, "Already a member");
            return Ok(false);
        }

        let notice = format!("{} has joined the group", self.display_name(id));
        debug!(connection_id = %id, group = %group, "Joined group");
        self.announce(&group, notice);

        Ok(true)
    }

    /// Removes `id` from a group and announces it to the remaining members.
    fn handle_leave_group(&mut self, id: ConnectionId, raw_group: &str) -> Result<bool, HubError> {
        self.require_live(id)?;
        let group = GroupName::parse(raw_group)?;

        let removed = self.groups.leave(&group, id);
        if !removed {
            debug!(connection_id = %id, group = %group, "Not a member");
            return Ok(false);
        }

        let notice = format!("{} has left the group", self.display_name(id));
        debug!(connection_id = %id, group = %group, "Left group");
        self.announce(&group, notice);

        Ok(true)
    }

    // ========================================================================
    // Routing Handlers
    // ========================================================================

    fn handle_send_broadcast(
        &mut self,
        id: ConnectionId,
        message: String,
    ) -> Result<DeliveryReport, HubError> {
        self.require_live(id)?;

        let msg = HubMessage::message(self.display_name(id), message);
        Ok(self.router.broadcast(self.connections.keys().copied(), &msg))
    }

    fn handle_send_direct(
        &mut self,
        id: ConnectionId,
        raw_target: &str,
        message: String,
    ) -> Result<ConnectionId, HubError> {
        self.require_live(id)?;
        let target = Username::parse(raw_target)?;
        let sender = self
            .registry
            .current_name(id)
            .cloned()
            .ok_or(HubError::SenderAnonymous)?;

        let delivery = HubMessage::private_message(sender.clone(), message.clone());
        let echo = HubMessage::private_message_sent(sender, target.clone(), message);

        self.router
            .send_direct(&self.registry, id, &target, &delivery, &echo)
            .map_err(|e| {
                debug!(connection_id = %id, target = %target, error = %e, "Direct send failed");
                e
            })
    }

    fn handle_send_group(
        &mut self,
        id: ConnectionId,
        raw_group: &str,
        message: String,
        exclude_self: bool,
    ) -> Result<DeliveryReport, HubError> {
        self.require_live(id)?;
        let group = GroupName::parse(raw_group)?;

        let msg = HubMessage::group_message(group.clone(), self.display_name(id), message);
        let exclude = exclude_self.then_some(id);
        Ok(self.router.send_to_group(&self.groups, &group, &msg, exclude))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn require_live(&self, id: ConnectionId) -> Result<(), HubError> {
        if self.connections.contains_key(&id) {
            Ok(())
        } else {
            Err(HubError::UnknownConnection(id))
        }
    }

    fn display_name(&self, id: ConnectionId) -> String {
        self.connections
            .get(&id)
            .map_or(huddle_core::ANONYMOUS, Connection::display_name)
            .to_string()
    }

    /// Sends the current presence list to every live connection.
    fn broadcast_presence(&self) {
        let msg = HubMessage::user_list(self.registry.all_names());
        self.router.broadcast(self.connections.keys().copied(), &msg);
    }

    /// Sends a system notice to the current members of `group`.
    fn announce(&self, group: &GroupName, notice: String) {
        let msg = HubMessage::group_message(group.clone(), SYSTEM_SENDER, notice);
        self.router.send_to_group(&self.groups, group, &msg, None);
    }

    #[cfg(test)]
    pub fn group_members(&self, group: &str) -> std::collections::BTreeSet<ConnectionId> {
        GroupName::parse(group)
            .map(|g| self.groups.members(&g))
            .unwrap_or_default()
    }
}
