//! link-layer frames exchanged between MAC instances

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wsn_core::{Destination, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Data,
    /// RICER ready-to-receive beacon.
    RtrBeacon,
    /// RICER acknowledgement that doubles as a fresh ready-to-receive beacon.
    AckRtrBeacon,
    /// BoxMac acknowledgement.
    Ack,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Data => "DATA",
            FrameKind::RtrBeacon => "RTR",
            FrameKind::AckRtrBeacon => "ACK/RTR",
            FrameKind::Ack => "ACK",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacFrame {
    pub kind: FrameKind,
    pub source: NodeId,
    pub destination: Destination,
    pub sequence_number: u32,
    /// Node whose data an ACK/RTR beacon acknowledges.
    pub ack_for: Option<NodeId>,
    /// Set on data submitted for broadcast, which RICER delivers as a series
    /// of unicasts with the destination rewritten to each neighbor.
    pub is_data_for_broadcast: bool,
    pub payload: Bytes,
    /// On-air size in bits, PHY overhead included.
    pub bits: u32,
}

impl MacFrame {
    pub fn data(source: NodeId, destination: Destination, payload: Bytes, bits: u32) -> Self {
        Self {
            kind: FrameKind::Data,
            source,
            destination,
            sequence_number: 0,
            ack_for: None,
            is_data_for_broadcast: destination.is_broadcast(),
            payload,
            bits,
        }
    }

    pub fn rtr_beacon(source: NodeId, bits: u32) -> Self {
        Self {
            kind: FrameKind::RtrBeacon,
            source,
            destination: Destination::Broadcast,
            sequence_number: 0,
            ack_for: None,
            is_data_for_broadcast: false,
            payload: Bytes::new(),
            bits,
        }
    }

    pub fn ack_rtr_beacon(source: NodeId, ack_for: NodeId, bits: u32) -> Self {
        Self {
            kind: FrameKind::AckRtrBeacon,
            ack_for: Some(ack_for),
            ..Self::rtr_beacon(source, bits)
        }
    }

    pub fn ack(source: NodeId, destination: NodeId, sequence_number: u32, bits: u32) -> Self {
        Self {
            kind: FrameKind::Ack,
            source,
            destination: Destination::Node(destination),
            sequence_number,
            ack_for: None,
            is_data_for_broadcast: false,
            payload: Bytes::new(),
            bits,
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind == FrameKind::Data
    }

    pub fn is_beacon(&self) -> bool {
        matches!(self.kind, FrameKind::RtrBeacon | FrameKind::AckRtrBeacon)
    }

    pub fn is_for(&self, node: NodeId) -> bool {
        self.destination.is_node(node)
    }
}
