use std::fmt;

use serde::{Deserialize, Serialize};

pub type NodeId = u32;

/// Link-layer destination of a frame or buffered packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Broadcast,
    Node(NodeId),
}

impl Destination {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Destination::Broadcast)
    }

    pub fn node(&self) -> Option<NodeId> {
        match self {
            Destination::Broadcast => None,
            Destination::Node(id) => Some(*id),
        }
    }

    /// True only for a unicast destination naming `id`.
    pub fn is_node(&self, id: NodeId) -> bool {
        *self == Destination::Node(id)
    }
}

/// Link-layer verdict on one unicast, reported from the MAC upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendOutcome {
    Acked,
    Failed,
}

impl From<NodeId> for Destination {
    fn from(id: NodeId) -> Self {
        Destination::Node(id)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => write!(f, "BROADCAST"),
            Destination::Node(id) => write!(f, "{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_helpers() {
        let dest: Destination = 7.into();
        assert!(dest.is_node(7));
        assert!(!dest.is_node(8));
        assert_eq!(dest.node(), Some(7));
        assert!(!Destination::Broadcast.is_node(7));
        assert_eq!(Destination::Broadcast.to_string(), "BROADCAST");
    }
}
