use std::collections::{HashMap, VecDeque};

use wsn_core::NodeId;

use crate::{PacketKind, RoutingPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeenKey {
    kind: PacketKind,
    sequence_number: u32,
    hop_count: u32,
}

/// Recently seen (kind, sequence, hop count) triples per origin.
///
/// The hop count is part of the key so a packet that comes back around a
/// routing loop is not mistaken for a link-layer retransmission.
#[derive(Debug, Clone)]
pub struct DuplicateHistory {
    per_origin: HashMap<NodeId, VecDeque<SeenKey>>,
    depth: usize,
}

impl DuplicateHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            per_origin: HashMap::new(),
            depth: depth.max(1),
        }
    }

    /// Records the packet and returns true if it was already in the history.
    pub fn check_and_record(&mut self, packet: &RoutingPacket) -> bool {
        let key = SeenKey {
            kind: packet.kind,
            sequence_number: packet.sequence_number,
            hop_count: packet.hop_count,
        };
        let seen = self.per_origin.entry(packet.origin).or_default();
        if seen.contains(&key) {
            return true;
        }
        seen.push_front(key);
        seen.truncate(self.depth);
        false
    }

    pub fn len(&self) -> usize {
        self.per_origin.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
