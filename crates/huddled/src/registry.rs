//! Identity bookkeeping: username ⇄ connection handle.
//!
//! `ConnectionRegistry` is plain data. It is owned by the hub actor, which
//! serializes every call, so each method here is atomic with respect to all
//! others by construction.
//!
//! # Invariant
//!
//! `by_name` and `by_connection` are exact inverses of each other: for every
//! `(name, id)` in one, `(id, name)` is in the other. At most one connection
//! holds a name, and a connection holds at most one name.

use std::collections::HashMap;

use huddle_core::{ConnectionId, Username};
use tracing::debug;

/// Outcome of an identity claim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityClaim {
    /// Name the claiming connection held before, if any.
    pub previous: Option<Username>,

    /// Another connection that held the name and was demoted to anonymous.
    pub demoted: Option<ConnectionId>,
}

/// Two-way map between claimed usernames and connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_name: HashMap<Username, ConnectionId>,
    by_connection: HashMap<ConnectionId, Username>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `name` with `id`, last claimant wins.
    ///
    /// If another connection holds `name`, it loses it (but stays connected).
    /// If `id` held a different name, that mapping is dropped first.
    /// Reclaiming one's own name is a no-op that reports the same name as
    /// `previous`.
    pub fn set_identity(&mut self, id: ConnectionId, name: Username) -> IdentityClaim {
        let previous = self.by_connection.remove(&id);
        if let Some(old) = &previous {
            self.by_name.remove(old);
        }

        let demoted = match self.by_name.insert(name.clone(), id) {
            Some(holder) if holder != id => {
                self.by_connection.remove(&holder);
                debug!(
                    name = %name,
                    demoted = %holder,
                    claimant = %id,
                    "Identity reclaimed by another connection"
                );
                Some(holder)
            }
            _ => None,
        };

        self.by_connection.insert(id, name);

        IdentityClaim { previous, demoted }
    }

    /// Removes any identity held by `id`. Idempotent.
    pub fn clear_identity(&mut self, id: ConnectionId) -> Option<Username> {
        let name = self.by_connection.remove(&id)?;
        self.by_name.remove(&name);
        Some(name)
    }

    /// Connection currently holding `name`.
    pub fn lookup(&self, name: &Username) -> Option<ConnectionId> {
        self.by_name.get(name).copied()
    }

    /// Name currently held by `id`.
    pub fn current_name(&self, id: ConnectionId) -> Option<&Username> {
        self.by_connection.get(&id)
    }

    /// Sorted snapshot of every claimed name.
    pub fn all_names(&self) -> Vec<Username> {
        let mut names: Vec<Username> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of claimed identities.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.by_name.len() == self.by_connection.len()
            && self
                .by_name
                .iter()
                .all(|(name, id)| self.by_connection.get(id) == Some(name))
    }
}
