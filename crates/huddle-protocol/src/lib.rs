//! Huddle Protocol - Wire protocol for hub communication
//!
//! Newline-delimited JSON messages exchanged between clients and the hub
//! over its Unix socket.

pub mod message;
pub mod version;

pub use message::{error_code, ClientMessage, HubMessage, MessageType};
pub use version::{ProtocolVersion, VersionError};
