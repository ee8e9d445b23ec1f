//! Room struct definition
//!
//! Represents a named chat room and the set of sessions currently in it.

use std::collections::HashSet;

use crate::types::{RoomName, SessionId};

/// Multi-member chat room
///
/// Holds member identities only; output channels live in the directory's
/// online set, so a room can never outlive the sessions it names.
#[derive(Debug)]
pub struct Room {
    /// Room name for identification
    pub name: RoomName,
    /// Current members
    members: HashSet<SessionId>,
}

impl Room {
    /// Create an empty room
    pub fn new(name: RoomName) -> Self {
        Self {
            name,
            members: HashSet::new(),
        }
    }

    /// Add a member
    ///
    /// Returns false if the session was already a member.
    pub fn add_member(&mut self, session_id: SessionId) -> bool {
        self.members.insert(session_id)
    }

    /// Remove a member
    ///
    /// Returns true if the room should be deleted (no members left).
    pub fn remove_member(&mut self, session_id: SessionId) -> bool {
        self.members.remove(&session_id);
        self.is_empty()
    }

    /// Check if a session is in this room
    pub fn contains(&self, session_id: SessionId) -> bool {
        self.members.contains(&session_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Get the number of members in the room
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Iterate over members, skipping `exclude`
    pub fn members_except(&self, exclude: SessionId) -> impl Iterator<Item = SessionId> + '_ {
        self.members.iter().copied().filter(move |id| *id != exclude)
    }

    /// Copy out all member IDs
    pub fn member_ids(&self) -> Vec<SessionId> {
        self.members.iter().copied().collect()
    }
}
