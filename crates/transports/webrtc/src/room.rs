//! Room membership as reported by the relay

use crate::peer::PeerId;
use crate::signaling::protocol::RoomMember;
use std::collections::BTreeMap;
use tracing::debug;

/// The room the local peer has joined
#[derive(Debug, Clone)]
pub struct Room {
    id: String,
    local_label: String,
    /// Remote members and their display labels
    members: BTreeMap<PeerId, Option<String>>,
}

impl Room {
    pub fn new(id: impl Into<String>, local_label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_label: local_label.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn local_label(&self) -> &str {
        &self.local_label
    }

    /// Record a remote member; returns true if it was not known yet
    pub fn add_member(&mut self, member: &RoomMember) -> bool {
        let is_new = !self.members.contains_key(&member.peer_id);
        self.members
            .insert(member.peer_id.clone(), member.display_label.clone());
        if is_new {
            debug!(room = %self.id, peer_id = %member.peer_id, "Member joined");
        }
        is_new
    }

    /// Forget a remote member; returns true if it was known
    pub fn remove_member(&mut self, peer_id: &PeerId) -> bool {
        self.members.remove(peer_id).is_some()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.members.contains_key(peer_id)
    }

    /// Display label of a member, falling back to its ID
    pub fn label_of(&self, peer_id: &PeerId) -> String {
        self.members
            .get(peer_id)
            .cloned()
            .flatten()
            .unwrap_or_else(|| peer_id.to_string())
    }

    /// Remote member IDs in ascending order
    pub fn members(&self) -> Vec<PeerId> {
        self.members.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let mut room = Room::new("r1", "Ada");
        assert!(room.add_member(&RoomMember::new("b2")));
        assert!(!room.add_member(&RoomMember::new("b2")));
        assert!(room.add_member(&RoomMember::new("a0")));

        assert_eq!(room.members(), vec![PeerId::from("a0"), PeerId::from("b2")]);
        assert!(room.remove_member(&PeerId::from("b2")));
        assert!(!room.remove_member(&PeerId::from("b2")));
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn test_label_falls_back_to_id() {
        let mut room = Room::new("r1", "Ada");
        let mut member = RoomMember::new("b2");
        member.display_label = Some("Grace".to_string());
        room.add_member(&member);
        room.add_member(&RoomMember::new("c3"));

        assert_eq!(room.label_of(&PeerId::from("b2")), "Grace");
        assert_eq!(room.label_of(&PeerId::from("c3")), "c3");
    }
}
