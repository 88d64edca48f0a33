use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wsn_core::{Destination, NodeId};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    Data,
    Beacon,
}

/// Network-layer packet carried in a MAC payload.
///
/// `destination` is the network destination (the sink for collection data,
/// the configured next hop for static routing). `next_hop` is the link-layer
/// receiver chosen when the packet was last handed to the MAC, which lets a
/// node that overhears a unicast recognise it is snooping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPacket {
    pub kind: PacketKind,
    pub source: NodeId,
    pub next_hop: Destination,
    pub destination: Destination,
    pub origin: NodeId,
    pub sequence_number: u32,
    pub hop_count: u32,
    /// `None` until the sender has a route.
    pub multihop_etx: Option<f64>,
    pub parent: Option<NodeId>,
    pub pull: bool,
    /// Remaining battery fractions of every node between the sender and the sink.
    pub battery_chain: Vec<f64>,
    pub payload: Bytes,
}

impl RoutingPacket {
    pub fn data(origin: NodeId, destination: Destination, sequence_number: u32, payload: Bytes) -> Self {
        Self {
            kind: PacketKind::Data,
            source: origin,
            next_hop: destination,
            destination,
            origin,
            sequence_number,
            hop_count: 0,
            multihop_etx: None,
            parent: None,
            pull: false,
            battery_chain: Vec::new(),
            payload,
        }
    }

    pub fn beacon(origin: NodeId, sequence_number: u32) -> Self {
        Self {
            kind: PacketKind::Beacon,
            source: origin,
            next_hop: Destination::Broadcast,
            destination: Destination::Broadcast,
            origin,
            sequence_number,
            hop_count: 0,
            multihop_etx: None,
            parent: None,
            pull: false,
            battery_chain: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn is_beacon(&self) -> bool {
        self.kind == PacketKind::Beacon
    }

    pub fn encode(&self) -> Result<Bytes> {
        let encoded = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        Ok(Bytes::from(encoded))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (packet, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(packet)
    }
}
