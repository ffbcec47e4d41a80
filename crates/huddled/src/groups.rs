//! Group membership bookkeeping.
//!
//! Keeps a forward map (group → members) and a reverse index
//! (connection → groups) so a disconnect only touches the groups that
//! connection actually joined. Groups are pruned when their last member
//! leaves; readers cannot tell an absent group from an empty one.

use std::collections::{BTreeSet, HashMap, HashSet};

use huddle_core::{ConnectionId, GroupName};

/// Group name → member set, with a per-connection reverse index.
#[derive(Debug, Default)]
pub struct GroupTable {
    members: HashMap<GroupName, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<GroupName>>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` to `group`. Returns `false` if it was already a member.
    pub fn join(&mut self, group: &GroupName, id: ConnectionId) -> bool {
        let added = self.members.entry(group.clone()).or_default().insert(id);
        if added {
            self.memberships.entry(id).or_default().insert(group.clone());
        }
        added
    }

    /// Removes `id` from `group`. Returns `false` if it was not a member.
    pub fn leave(&mut self, group: &GroupName, id: ConnectionId) -> bool {
        let removed = self.detach(group, id);
        if removed {
            if let Some(groups) = self.memberships.get_mut(&id) {
                groups.remove(group);
                if groups.is_empty() {
                    self.memberships.remove(&id);
                }
            }
        }
        removed
    }

    /// Removes `id` from every group it belongs to.
    ///
    /// Cost is proportional to the number of groups `id` joined, not the
    /// total number of groups. Returns the groups it was removed from.
    pub fn remove_everywhere(&mut self, id: ConnectionId) -> Vec<GroupName> {
        let Some(groups) = self.memberships.remove(&id) else {
            return Vec::new();
        };

        let mut left: Vec<GroupName> = groups
            .into_iter()
            .filter(|group| self.detach(group, id))
            .collect();
        left.sort();
        left
    }

    /// Snapshot of `group`'s members. Empty if the group does not exist.
    pub fn members(&self, group: &GroupName) -> BTreeSet<ConnectionId> {
        self.members
            .get(group)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Groups `id` currently belongs to, sorted.
    pub fn groups_of(&self, id: ConnectionId) -> Vec<GroupName> {
        let mut groups: Vec<GroupName> = self
            .memberships
            .get(&id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.members.len()
    }

    /// Forward-map removal with pruning. Leaves the reverse index alone.
    fn detach(&mut self, group: &GroupName, id: ConnectionId) -> bool {
        let Some(set) = self.members.get_mut(group) else {
            return false;
        };
        let removed = set.remove(&id);
        if set.is_empty() {
            self.members.remove(group);
        }
        removed
    }
}
