//! Huddle Core - Shared domain types for the presence-and-routing hub
//!
//! This crate provides the identifiers and session entities shared between
//! the hub daemon (huddled) and the wire protocol.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod ids;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use ids::{ConnectionId, GroupName, Username, MAX_NAME_LEN};
pub use session::{Connection, DisconnectReason, SessionState, ANONYMOUS, SYSTEM_SENDER};
