//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Registers the connection with the hub
//! - Parses incoming messages and forwards them to the hub in order
//! - Reports errors back to this client only
//!
//! Outbound traffic (replies and hub fan-out alike) goes through the
//! connection's outbox and is written by [`write_outbox`].
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_core::{ConnectionId, DisconnectReason};
use huddle_protocol::{
    error_code, ClientMessage, HubMessage, MessageType, ProtocolVersion, VersionError,
};

use crate::hub::{HubError, HubHandle};

/// Maximum message size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read timeout for idle connections (5 minutes)
pub const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_message_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

/// Connection handler for a single client.
///
/// Manages the lifecycle of a client connection including:
/// - Protocol handshake
/// - Message processing loop
/// - Graceful shutdown
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// This connection's outbox, for replies
    outbox: mpsc::Sender<HubMessage>,

    /// Handle to the hub
    hub: HubHandle,

    /// Handle assigned by the server
    connection_id: ConnectionId,

    limits: ConnectionLimits,

    /// Server-wide shutdown signal
    cancel_token: CancellationToken,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        reader: OwnedReadHalf,
        outbox: mpsc::Sender<HubMessage>,
        hub: HubHandle,
        connection_id: ConnectionId,
        limits: ConnectionLimits,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            outbox,
            hub,
            connection_id,
            limits,
            cancel_token,
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake, then processes messages until the connection
    /// closes. Returns the disconnect reason once the hub has accepted the
    /// connection (so the caller must report it), or `None` if the hub never
    /// registered it.
    pub async fn run(mut self) -> Option<DisconnectReason> {
        let id = self.connection_id;
        debug!(connection_id = %id, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(connection_id = %id, error = %e, "Handshake failed");
            return None;
        }

        // Registered with the hub from here on; every exit reports a reason.
        let result = match self.reply(HubMessage::connected(id)).await {
            Ok(()) => {
                info!(connection_id = %id, "Client handshake completed");
                self.process_messages().await
            }
            Err(e) => Err(e),
        };

        let reason = match result {
            Ok(reason) => reason,
            Err(e) => {
                debug!(connection_id = %id, error = %e, "Connection closed");
                e.disconnect_reason()
            }
        };

        info!(connection_id = %id, reason = %reason, "Client disconnected");
        Some(reason)
    }

    /// Handles the initial protocol handshake.
    ///
    /// Expects a `Connect` message with a compatible protocol version and
    /// registers the connection with the hub, answering `Rejected` on
    /// failure. Success means the hub holds the connection; the `Connected`
    /// reply is left to the caller.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(self.limits.read_timeout, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        if let Err(e) = msg.protocol_version.negotiate(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %msg.protocol_version,
                hub_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.reply(HubMessage::rejected(e.to_string())).await?;
            return Err(e.into());
        }

        if msg.message != MessageType::Connect {
            self.reply(HubMessage::error_with_code(
                "Expected connect message for handshake",
                error_code::INVALID_MESSAGE,
            ))
            .await?;
            return Err(ConnectionError::UnexpectedMessage(format!("{:?}", msg.message)));
        }

        if let Err(e) = self.hub.connect(self.connection_id).await {
            self.reply(HubMessage::rejected(e.to_string())).await?;
            return Err(ConnectionError::Rejected(e));
        }

        Ok(())
    }

    /// Main message processing loop.
    ///
    /// Returns the reason the loop ended cleanly; errors carry their own.
    async fn process_messages(&mut self) -> Result<DisconnectReason, ConnectionError> {
        let cancel_token = self.cancel_token.clone();

        loop {
            let read = tokio::select! {
                _ = cancel_token.cancelled() => return Ok(DisconnectReason::Shutdown),
                read = timeout(self.limits.read_timeout, self.read_message()) => read,
            };

            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Parse(e))) => {
                    // Line framing is intact, so the stream is still usable
                    debug!(connection_id = %self.connection_id, error = %e, "Malformed message");
                    self.reply(HubMessage::error_with_code(
                        format!("Invalid message: {e}"),
                        error_code::INVALID_MESSAGE,
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(ConnectionError::Eof)) => return Ok(DisconnectReason::Eof),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(connection_id = %self.connection_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            if let MessageType::Disconnect = msg.message {
                debug!(connection_id = %self.connection_id, "Client requested disconnect");
                return Ok(DisconnectReason::ClientRequested);
            }

            self.handle_message(msg.message).await?;
        }
    }

    /// Forwards one message to the hub and reports failures to this client.
    async fn handle_message(&mut self, message: MessageType) -> Result<(), ConnectionError> {
        let id = self.connection_id;

        let result = match message {
            MessageType::Connect => {
                self.reply(HubMessage::error_with_code(
                    "Already connected",
                    error_code::INVALID_MESSAGE,
                ))
                .await?;
                return Ok(());
            }
            MessageType::SetIdentity { name } => self.hub.set_identity(id, name).await.map(drop),
            MessageType::SendBroadcast { message } => {
                self.hub.send_broadcast(id, message).await.map(drop)
            }
            MessageType::SendDirect { to, message } => {
                self.hub.send_direct(id, to, message).await.map(drop)
            }
            MessageType::JoinGroup { group } => self.hub.join_group(id, group).await.map(drop),
            MessageType::LeaveGroup { group } => self.hub.leave_group(id, group).await.map(drop),
            MessageType::SendGroup {
                group,
                message,
                exclude_self,
            } => self
                .hub
                .send_group(id, group, message, exclude_self)
                .await
                .map(drop),
            MessageType::ListUsers => {
                let users = self.hub.all_names().await;
                return self.reply(HubMessage::user_list(users)).await;
            }
            MessageType::Ping { seq } => return self.reply(HubMessage::pong(seq)).await,
            MessageType::Disconnect => return Ok(()),
        };

        match result {
            Ok(()) => Ok(()),
            Err(HubError::ChannelClosed) => Err(ConnectionError::HubUnavailable),
            Err(e) => {
                debug!(connection_id = %id, error = %e, "Request rejected");
                self.reply(HubMessage::error_with_code(e.to_string(), e.code()))
                    .await
            }
        }
    }

    /// Reads a single message from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let max = self.limits.max_message_size;
        let mut line = String::new();

        // Read at most one byte past the limit so oversized lines are caught
        // without buffering them whole.
        let bytes_read = (&mut self.reader)
            .take(read_limit(max))
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if bytes_read > max {
            return Err(ConnectionError::MessageTooLarge {
                size: bytes_read,
                max,
            });
        }

        let msg: ClientMessage =
            serde_json::from_str(&line).map_err(|e| ConnectionError::Parse(e.to_string()))?;

        Ok(msg)
    }

    /// Queues a reply for this client.
    async fn reply(&self, msg: HubMessage) -> Result<(), ConnectionError> {
        self.outbox
            .send(msg)
            .await
            .map_err(|_| ConnectionError::OutboxClosed)
    }

    /// Returns the connection's handle.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

/// Bytes to read for one line: one past `max` so oversized lines are
/// detectable.
fn read_limit(max: usize) -> u64 {
    (max as u64).saturating_add(1)
}

/// Drains a connection's outbox onto its socket.
///
/// Ends when every sender is gone (after flushing what was queued) or on the
/// first write failure, which drops the receiver so later deliveries fail
/// fast as unreachable.
pub async fn write_outbox(
    connection_id: ConnectionId,
    mut outbox: mpsc::Receiver<HubMessage>,
    writer: OwnedWriteHalf,
    write_timeout: Duration,
) {
    let mut writer = BufWriter::new(writer);

    while let Some(msg) = outbox.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Failed to serialize message");
                continue;
            }
        };

        let write = async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        };

        match timeout(write_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection_id = %connection_id, error = %e, "Write failed");
                break;
            }
            Err(_) => {
                debug!(connection_id = %connection_id, "Write timed out");
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Rejected by hub: {0}")]
    Rejected(HubError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Outbox closed")]
    OutboxClosed,

    #[error("Hub unavailable")]
    HubUnavailable,
}

impl ConnectionError {
    /// Disconnect reason reported to the hub when this error ends a session.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Eof => DisconnectReason::Eof,
            Self::Timeout => DisconnectReason::Timeout,
            Self::HubUnavailable => DisconnectReason::Shutdown,
            Self::Version(_)
            | Self::UnexpectedMessage(_)
            | Self::Rejected(_)
            | Self::Parse(_)
            | Self::Io(_)
            | Self::MessageTooLarge { .. }
            | Self::OutboxClosed => DisconnectReason::TransportError,
        }
    }
}
