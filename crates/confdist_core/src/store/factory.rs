//! Factory group membership.

use std::collections::BTreeSet;

/// A named group of records sharing one factory identity.
///
/// The group exists independently of its current membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factory {
    identity: String,
    members: BTreeSet<String>,
}

impl Factory {
    pub fn new(identity: impl Into<String>) -> Self {
        Self::with_members(identity, BTreeSet::new())
    }

    pub fn with_members(identity: impl Into<String>, members: BTreeSet<String>) -> Self {
        Self {
            identity: identity.into(),
            members,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    /// Adds a member; returns `false` when it was already registered.
    pub fn add_member(&mut self, record_identity: &str) -> bool {
        self.members.insert(record_identity.to_string())
    }

    pub fn remove_member(&mut self, record_identity: &str) -> bool {
        self.members.remove(record_identity)
    }
}
