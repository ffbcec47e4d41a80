//! Integration tests for the Unix socket server.
//!
//! These tests drive the HubServer as a complete system over real sockets:
//! handshake, identities, direct and group routing, disconnect cleanup and
//! graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use huddle_core::{ConnectionId, GroupName, SessionState, Username};
use huddle_protocol::{error_code, ClientMessage, HubMessage, MessageType, ProtocolVersion};
use huddled::hub::{spawn_hub, HubHandle, MAX_CONNECTIONS};
use huddled::server::{ConnectionLimits, HubServer, Outboxes};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Maximum time to wait for any single message
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    hub: HubHandle,
    cancel_token: CancellationToken,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    /// Spawns a server with default limits.
    async fn spawn() -> Self {
        Self::spawn_with(MAX_CONNECTIONS, ConnectionLimits::default()).await
    }

    /// Spawns a server with the given capacity and per-connection limits.
    async fn spawn_with(max_connections: usize, limits: ConnectionLimits) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");

        let outboxes = Arc::new(Outboxes::new(64));
        let hub = spawn_hub(Arc::clone(&outboxes), max_connections);
        let cancel_token = CancellationToken::new();

        let server = HubServer::new(
            socket_path.clone(),
            hub.clone(),
            outboxes,
            cancel_token.clone(),
        )
        .with_limits(limits);

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }

        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        TestServer {
            socket_path,
            hub,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a raw client connection to the server.
    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects, handshakes and claims `name`, consuming the claim's replies.
    async fn join_as(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.handshake().await;
        client.send(ClientMessage::set_identity(name)).await;
        assert!(matches!(client.recv().await, HubMessage::IdentitySet { .. }));
        assert!(matches!(client.recv().await, HubMessage::UserList { .. }));
        client
    }

    /// Shuts down the server gracefully.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    id: ConnectionId,
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            id: ConnectionId::new(0),
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Sends a message to the server.
    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    /// Receives the next message, failing the test if none arrives in time.
    async fn recv(&mut self) -> HubMessage {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("message within timeout")
            .unwrap();
        assert!(n > 0, "connection closed while waiting for a message");
        serde_json::from_str(&line).unwrap()
    }

    /// Returns true if the server closed the connection.
    async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    /// Asserts nothing is queued ahead of a fresh ping reply.
    async fn assert_idle(&mut self, seq: u64) {
        self.send(ClientMessage::ping(seq)).await;
        assert_eq!(self.recv().await, HubMessage::pong(seq));
    }

    /// Performs the handshake and records the assigned handle.
    async fn handshake(&mut self) -> ConnectionId {
        self.send(ClientMessage::connect()).await;

        match self.recv().await {
            HubMessage::Connected { connection_id, .. } => {
                self.id = connection_id;
                connection_id
            }
            other => panic!("Expected Connected, got {other:?}"),
        }
    }
}

/// Writes one message on a raw write half.
async fn write_line(writer: &mut tokio::net::unix::OwnedWriteHalf, msg: &ClientMessage) {
    let json = serde_json::to_string(msg).unwrap();
    writer.write_all(json.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();
}

fn name(s: &str) -> Username {
    Username::parse(s).unwrap()
}

fn group(s: &str) -> GroupName {
    GroupName::parse(s).unwrap()
}

fn users(names: &[&str]) -> HubMessage {
    HubMessage::user_list(names.iter().map(|n| name(n)).collect())
}

fn error_code_of(msg: &HubMessage) -> Option<&str> {
    match msg {
        HubMessage::Error { code, .. } => code.as_deref(),
        _ => None,
    }
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_success() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::connect()).await;

    match client.recv().await {
        HubMessage::Connected {
            protocol_version,
            connection_id,
        } => {
            assert_eq!(protocol_version, ProtocolVersion::CURRENT);
            assert_eq!(
                server.hub.connection_state(connection_id).await,
                SessionState::Anonymous
            );
        }
        other => panic!("Expected Connected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_connections_get_distinct_handles() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    let id_a = a.handshake().await;
    let id_b = b.handshake().await;

    assert_ne!(id_a, id_b);
    assert_eq!(server.hub.connection_count().await, 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_version_mismatch_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientMessage {
            protocol_version: ProtocolVersion::new(99, 0),
            message: MessageType::Connect,
        })
        .await;

    match client.recv().await {
        HubMessage::Rejected { reason, .. } => assert!(reason.contains("99.0")),
        other => panic!("Expected Rejected, got {other:?}"),
    }
    assert!(client.is_closed().await);
    assert_eq!(server.hub.connection_count().await, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_first_message_must_be_connect() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::set_identity("alice")).await;

    let reply = client.recv().await;
    assert_eq!(error_code_of(&reply), Some(error_code::INVALID_MESSAGE));
    assert!(client.is_closed().await);
    assert!(server.hub.all_names().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_full_hub_rejects_connection() {
    let server = TestServer::spawn_with(1, ConnectionLimits::default()).await;

    let mut first = server.connect().await;
    first.handshake().await;

    let mut second = server.connect().await;
    second.send(ClientMessage::connect()).await;
    assert!(matches!(second.recv().await, HubMessage::Rejected { .. }));
    assert!(second.is_closed().await);

    first.assert_idle(1).await;

    server.shutdown().await;
}

// ============================================================================
// Identity Tests
// ============================================================================

#[tokio::test]
async fn test_set_identity_broadcasts_presence() {
    let server = TestServer::spawn().await;

    let mut alice = server.join_as("alice").await;
    let mut bob = server.connect().await;
    bob.handshake().await;

    bob.send(ClientMessage::set_identity("bob")).await;
    assert_eq!(bob.recv().await, HubMessage::identity_set(name("bob")));
    assert_eq!(bob.recv().await, users(&["alice", "bob"]));
    assert_eq!(alice.recv().await, users(&["alice", "bob"]));

    assert_eq!(server.hub.lookup(&name("bob")).await, Some(bob.id));

    server.shutdown().await;
}

#[tokio::test]
async fn test_reclaimed_name_demotes_previous_holder() {
    let server = TestServer::spawn().await;

    let mut first = server.join_as("alice").await;
    let mut second = server.connect().await;
    second.handshake().await;

    second.send(ClientMessage::set_identity("alice")).await;
    assert_eq!(second.recv().await, HubMessage::identity_set(name("alice")));
    assert_eq!(second.recv().await, users(&["alice"]));
    assert_eq!(first.recv().await, users(&["alice"]));

    assert_eq!(server.hub.lookup(&name("alice")).await, Some(second.id));
    assert_eq!(server.hub.current_name(first.id).await, None);
    assert_eq!(
        server.hub.connection_state(first.id).await,
        SessionState::Anonymous
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_name_reported_to_caller_only() {
    let server = TestServer::spawn().await;

    let mut watcher = server.join_as("watcher").await;
    let mut client = server.connect().await;
    client.handshake().await;

    client.send(ClientMessage::set_identity("   ")).await;
    let reply = client.recv().await;
    assert_eq!(error_code_of(&reply), Some(error_code::VALIDATION));

    watcher.assert_idle(7).await;
    client.assert_idle(8).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_users() {
    let server = TestServer::spawn().await;

    let mut alice = server.join_as("alice").await;
    alice.send(ClientMessage::list_users()).await;
    assert_eq!(alice.recv().await, users(&["alice"]));

    server.shutdown().await;
}

// ============================================================================
// Routing Tests
// ============================================================================

#[tokio::test]
async fn test_broadcast_reaches_everyone_including_sender() {
    let server = TestServer::spawn().await;

    let mut alice = server.join_as("alice").await;
    let mut anon = server.connect().await;
    anon.handshake().await;
    // alice's claim happened before anon connected, so anon has no backlog

    alice.send(ClientMessage::send_broadcast("hello all")).await;

    let expected = HubMessage::message("alice", "hello all");
    assert_eq!(alice.recv().await, expected);
    assert_eq!(anon.recv().await, expected);

    anon.send(ClientMessage::send_broadcast("hi")).await;
    assert_eq!(alice.recv().await, HubMessage::message("Anonymous", "hi"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_direct_message_and_echo() {
    let server = TestServer::spawn().await;

    let mut alice = server.join_as("alice").await;
    let mut bob = server.join_as("bob").await;
    assert_eq!(alice.recv().await, users(&["alice", "bob"]));

    alice.send(ClientMessage::send_direct("bob", "psst")).await;

    assert_eq!(
        bob.recv().await,
        HubMessage::private_message(name("alice"), "psst")
    );
    assert_eq!(
        alice.recv().await,
        HubMessage::private_message_sent(name("alice"), name("bob"), "psst")
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_direct_to_unknown_user() {
    let server = TestServer::spawn().await;

    let mut alice = server.join_as("alice").await;
    alice.send(ClientMessage::send_direct("nobody", "hello?")).await;

    let reply = alice.recv().await;
    assert_eq!(error_code_of(&reply), Some(error_code::NOT_FOUND));
    match reply {
        HubMessage::Error { message, .. } => assert!(message.contains("nobody")),
        other => panic!("Expected Error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_anonymous_direct_send_rejected() {
    let server = TestServer::spawn().await;

    let mut bob = server.join_as("bob").await;
    let mut anon = server.connect().await;
    anon.handshake().await;

    anon.send(ClientMessage::send_direct("bob", "hi")).await;
    let reply = anon.recv().await;
    assert_eq!(error_code_of(&reply), Some(error_code::SENDER_ANONYMOUS));

    bob.assert_idle(3).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_group_join_send_and_disconnect_cleanup() {
    let server = TestServer::spawn().await;

    let mut alice = server.join_as("alice").await;
    let mut bob = server.join_as("bob").await;
    assert_eq!(alice.recv().await, users(&["alice", "bob"]));

    let room = group("room");

    alice.send(ClientMessage::join_group("room")).await;
    assert_eq!(
        alice.recv().await,
        HubMessage::group_message(room.clone(), "System", "alice has joined the group")
    );

    bob.send(ClientMessage::join_group("room")).await;
    let notice = HubMessage::group_message(room.clone(), "System", "bob has joined the group");
    assert_eq!(bob.recv().await, notice);
    assert_eq!(alice.recv().await, notice);

    // Excluding the sender delivers to bob only
    alice
        .send(ClientMessage::send_group("room", "just you", true))
        .await;
    assert_eq!(
        bob.recv().await,
        HubMessage::group_message(room.clone(), "alice", "just you")
    );
    alice.assert_idle(1).await;

    assert_eq!(
        server.hub.members(&room).await,
        BTreeSet::from([alice.id, bob.id])
    );

    alice.send(ClientMessage::disconnect()).await;
    assert!(alice.is_closed().await);
    assert_eq!(bob.recv().await, users(&["bob"]));

    assert_eq!(server.hub.members(&room).await, BTreeSet::from([bob.id]));
    assert_eq!(server.hub.lookup(&name("alice")).await, None);
    assert_eq!(
        server.hub.connection_state(alice.id).await,
        SessionState::Closed
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_leave_group_announces_to_remaining_members() {
    let server = TestServer::spawn().await;

    let mut alice = server.join_as("alice").await;
    let mut bob = server.join_as("bob").await;
    assert_eq!(alice.recv().await, users(&["alice", "bob"]));

    alice.send(ClientMessage::join_group("room")).await;
    alice.recv().await;
    bob.send(ClientMessage::join_group("room")).await;
    bob.recv().await;
    alice.recv().await;

    bob.send(ClientMessage::leave_group("room")).await;
    assert_eq!(
        alice.recv().await,
        HubMessage::group_message(group("room"), "System", "bob has left the group")
    );
    bob.assert_idle(2).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_abrupt_disconnect_cleans_up() {
    let server = TestServer::spawn().await;

    let mut watcher = server.join_as("watcher").await;
    let mut alice = server.join_as("alice").await;
    assert_eq!(watcher.recv().await, users(&["alice", "watcher"]));

    alice.send(ClientMessage::join_group("room")).await;
    alice.recv().await;
    let alice_id = alice.id;
    drop(alice);

    assert_eq!(watcher.recv().await, users(&["watcher"]));
    assert!(server.hub.members(&group("room")).await.is_empty());
    assert_eq!(
        server.hub.connection_state(alice_id).await,
        SessionState::Closed
    );

    server.shutdown().await;
}

// ============================================================================
// Robustness Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_message_is_not_fatal() {
    let server = TestServer::spawn().await;

    let mut client = server.connect().await;
    client.handshake().await;

    client.send_raw("{not json").await;
    let reply = client.recv().await;
    assert_eq!(error_code_of(&reply), Some(error_code::INVALID_MESSAGE));

    client.assert_idle(5).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_message_closes_connection() {
    let limits = ConnectionLimits {
        max_message_size: 128,
        ..ConnectionLimits::default()
    };
    let server = TestServer::spawn_with(MAX_CONNECTIONS, limits).await;

    let mut client = server.connect().await;
    let id = client.handshake().await;

    client
        .send(ClientMessage::send_broadcast("x".repeat(1024)))
        .await;
    assert!(client.is_closed().await);

    sleep(SHUTDOWN_GRACE_PERIOD).await;
    assert_eq!(server.hub.connection_state(id).await, SessionState::Closed);

    server.shutdown().await;
}

#[tokio::test]
async fn test_clients_dropped_during_handshake_are_released() {
    let server = TestServer::spawn().await;

    // One live client keeps the hub fanning out presence lists
    let stream = UnixStream::connect(&server.socket_path).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(_)) = lines.next_line().await {}
    });
    write_line(&mut writer, &ClientMessage::connect()).await;

    let stop = CancellationToken::new();
    let churn = {
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut n = 0u64;
            while !stop.is_cancelled() {
                let claim = ClientMessage::set_identity(format!("churn{}", n % 8));
                write_line(&mut writer, &claim).await;
                n += 1;
                sleep(Duration::from_millis(1)).await;
            }
            writer
        })
    };

    let connect = format!("{}\n", serde_json::to_string(&ClientMessage::connect()).unwrap());
    for _ in 0..300 {
        let mut stream = UnixStream::connect(&server.socket_path).await.unwrap();
        stream.write_all(connect.as_bytes()).await.unwrap();
        drop(stream);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.hub.connection_count().await != 1 && tokio::time::Instant::now() < deadline {
        sleep(Duration::from_millis(20)).await;
    }

    stop.cancel();
    let _writer = churn.await.unwrap();

    assert_eq!(server.hub.connection_count().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_removes_socket() {
    let server = TestServer::spawn().await;
    let socket_path = server.socket_path.clone();
    let hub = server.hub.clone();

    let mut client = server.connect().await;
    client.handshake().await;

    server.shutdown().await;

    assert!(client.is_closed().await);
    assert!(!socket_path.exists());
    assert_eq!(hub.connection_count().await, 0);
}
