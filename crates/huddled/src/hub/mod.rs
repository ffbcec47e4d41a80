//! Session lifecycle using the Actor pattern.
//!
//! The hub actor is the single owner of connection, identity and group
//! state. It receives commands via a tokio mpsc channel, applies them one at
//! a time, and routes the resulting notifications through the transport.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│    HubActor     │────▶│    Transport    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │                       │
//!         │   HubCommand          │   Router              │ try_send
//!         │   (mpsc channel)      │   (recipient sets)    │ per outbox
//!         ▼                       ▼                       ▼
//!   connect / identity      ConnectionRegistry      client sockets
//!   groups / sends          GroupTable
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

use crate::transport::Transport;

mod actor;
mod commands;
mod handle;

pub use actor::{HubActor, MAX_CONNECTIONS};
pub use commands::{HubCommand, HubError, HubEvent};
pub use handle::HubHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawn the hub actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the HubActor on a tokio task
/// 3. Returns a HubHandle for client use
///
/// The actor stops once every clone of the returned handle is dropped.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use huddled::hub::{spawn_hub, MAX_CONNECTIONS};
/// use huddled::server::Outboxes;
///
/// #[tokio::main]
/// async fn main() {
///     let outboxes = Arc::new(Outboxes::new(256));
///     let hub = spawn_hub(Arc::clone(&outboxes), MAX_CONNECTIONS);
///
///     let names = hub.all_names().await;
/// }
/// ```
pub fn spawn_hub<T: Transport>(transport: T, max_connections: usize) -> HubHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = HubActor::new(cmd_rx, event_tx.clone(), transport, max_connections);
    tokio::spawn(actor.run());

    HubHandle::new(cmd_tx, event_tx)
}
