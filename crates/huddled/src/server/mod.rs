//! Unix socket server for the hub.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Assigns each connection a unique handle and an outbox
//! - Spawns a ConnectionHandler and an outbox writer per client
//! - Reports every disconnect to the hub exactly once
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    HubServer    │
//! │                 │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│    HubHandle    │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └────────┬────────┘
//!                                  │ Transport::send
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  write_outbox   │◀────│    Outboxes     │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod connection;
mod outbox;

pub use connection::{
    write_outbox, ConnectionError, ConnectionHandler, ConnectionLimits, MAX_MESSAGE_SIZE,
    READ_TIMEOUT, WRITE_TIMEOUT,
};
pub use outbox::{Outboxes, DEFAULT_OUTBOX_CAPACITY};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use huddle_core::ConnectionId;

use crate::hub::{HubEvent, HubHandle};

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/huddle.sock";

/// Unix socket server for the hub.
pub struct HubServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Handle to the hub actor
    hub: HubHandle,

    /// Outbound queues; also the transport the hub was spawned with
    outboxes: Arc<Outboxes>,

    limits: ConnectionLimits,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Source of connection handles; starts at 1
    connection_counter: AtomicU64,
}

impl HubServer {
    /// Creates a new hub server.
    ///
    /// `outboxes` must be the same instance the hub actor sends through.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        hub: HubHandle,
        outboxes: Arc<Outboxes>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            hub,
            outboxes,
            limits: ConnectionLimits::default(),
            cancel_token,
            connection_counter: AtomicU64::new(1),
        }
    }

    /// Overrides the per-connection limits.
    pub fn with_limits(mut self, limits: ConnectionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;

        info!(socket = %self.socket_path.display(), "Hub server listening");

        self.spawn_event_logger();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let id = ConnectionId::new(
                                self.connection_counter.fetch_add(1, Ordering::Relaxed),
                            );
                            self.handle_connection(stream, id);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    /// Replaces any stale socket file and binds the listener.
    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_error = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_error)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_error)?;
            }
        }

        UnixListener::bind(&self.socket_path).map_err(setup_error)
    }

    /// Spawns the reader and writer tasks for one client.
    fn handle_connection(&self, stream: UnixStream, id: ConnectionId) {
        let (reader, writer) = stream.into_split();
        let (outbox, queue) = self.outboxes.open(id);
        let hub = self.hub.clone();
        let outboxes = Arc::clone(&self.outboxes);
        let limits = self.limits;
        let cancel_token = self.cancel_token.child_token();

        let writer_task = tokio::spawn(write_outbox(id, queue, writer, limits.write_timeout));

        tokio::spawn(async move {
            let handler =
                ConnectionHandler::new(reader, outbox, hub.clone(), id, limits, cancel_token);

            if let Some(reason) = handler.run().await {
                if let Err(e) = hub.disconnect(id, reason).await {
                    debug!(connection_id = %id, error = %e, "Disconnect not recorded");
                }
            }

            // The handler's reply sender is gone; closing the route lets the
            // writer flush what is queued and exit.
            outboxes.close(id);
            if let Err(e) = writer_task.await {
                warn!(connection_id = %id, error = %e, "Outbox writer task failed");
            }
        });
    }

    /// Logs hub lifecycle events until shutdown.
    fn spawn_event_logger(&self) {
        let mut event_rx = self.hub.subscribe();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,

                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => log_event(&event),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event logger lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Removes the socket file on shutdown.
    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

fn log_event(event: &HubEvent) {
    match event {
        HubEvent::Connected { connection_id } => {
            debug!(connection_id = %connection_id, "Connection registered");
        }
        HubEvent::IdentityClaimed {
            connection_id,
            name,
            previous,
        } => {
            info!(
                connection_id = %connection_id,
                name = %name,
                previous = ?previous.as_ref().map(|n| n.as_str()),
                "Identity claimed"
            );
        }
        HubEvent::Demoted {
            connection_id,
            name,
        } => {
            info!(connection_id = %connection_id, name = %name, "Connection demoted to anonymous");
        }
        HubEvent::Disconnected {
            connection_id,
            name,
            reason,
        } => {
            debug!(
                connection_id = %connection_id,
                name = ?name.as_ref().map(|n| n.as_str()),
                reason = %reason,
                "Connection removed"
            );
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}
