//! Huddle hub - presence and message routing for long-lived connections
//!
//! This crate provides the core infrastructure for the hub:
//! - `registry` - Name ↔ connection bijection (presence)
//! - `groups` - Named groups of connections
//! - `router` - Fan-out of messages to recipient sets
//! - `hub` - Session lifecycle actor owning all of the above
//! - `transport` - Delivery contract the hub sends through
//! - `server` - Unix socket server for client connections
//! - `config` - TOML configuration for the daemon
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       huddled daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   HubServer     │────▶│         HubActor            │    │
//! │  │ (Unix Socket)   │     │ registry / groups / router  │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │                   │
//! │           │ connections                 │ Transport::send   │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │ConnectionHandler│     │  Outboxes (per-client mpsc) │    │
//! │  │  (per client)   │     │  drained by write_outbox    │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod groups;
pub mod hub;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;
