//! bounded transmit buffer with per-packet retry accounting

use std::collections::{HashSet, VecDeque};

use log::debug;
use thiserror::Error;
use wsn_core::NodeId;

use crate::{MacError, MacFrame, Result};

#[derive(Debug, Clone)]
pub struct BufferedPacket {
    pub frame: MacFrame,
    pub send_attempts: u32,
    sent_to: HashSet<NodeId>,
}

impl BufferedPacket {
    fn new(frame: MacFrame) -> Self {
        Self {
            frame,
            send_attempts: 0,
            sent_to: HashSet::new(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.frame.destination.is_broadcast()
    }

    pub fn was_sent_to(&self, node: NodeId) -> bool {
        self.sent_to.contains(&node)
    }

    fn is_for(&self, node: NodeId) -> bool {
        if self.is_broadcast() {
            !self.was_sent_to(node)
        } else {
            self.frame.is_for(node)
        }
    }
}

/// Rejection carrying the frame back to the caller.
#[derive(Debug, Error)]
#[error("Transmit buffer full ({capacity} packets)")]
pub struct BufferFull {
    pub capacity: usize,
    pub frame: MacFrame,
}

#[derive(Debug)]
pub struct TransmitBuffer {
    capacity: usize,
    packets: VecDeque<BufferedPacket>,
}

impl TransmitBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            packets: VecDeque::with_capacity(capacity),
        }
    }

    pub fn enqueue(&mut self, frame: MacFrame) -> std::result::Result<(), BufferFull> {
        if self.packets.len() >= self.capacity {
            return Err(BufferFull {
                capacity: self.capacity,
                frame,
            });
        }
        self.packets.push_back(BufferedPacket::new(frame));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// First packet that is unicast to `node` or a broadcast not yet sent to it.
    pub fn next_for(&self, node: NodeId) -> Option<&BufferedPacket> {
        self.packets.iter().find(|packet| packet.is_for(node))
    }

    pub fn has_packet_for(&self, node: NodeId) -> bool {
        self.next_for(node).is_some()
    }

    pub fn mark_sent_broadcast(&mut self, node: NodeId) -> Result<()> {
        let packet = self
            .packets
            .iter_mut()
            .find(|packet| packet.is_broadcast() && !packet.was_sent_to(node))
            .ok_or(MacError::NoPacketFor(node))?;
        packet.sent_to.insert(node);
        Ok(())
    }

    pub fn remove_unicast(&mut self, node: NodeId) -> Result<BufferedPacket> {
        let index = self
            .packets
            .iter()
            .position(|packet| packet.frame.is_for(node))
            .ok_or(MacError::NoPacketFor(node))?;
        self.packets.remove(index).ok_or(MacError::NoPacketFor(node))
    }

    pub fn increment_all_attempts(&mut self) {
        for packet in self.packets.iter_mut() {
            packet.send_attempts += 1;
        }
    }

    /// Evicts broadcasts that have had their send window and unicasts that
    /// reached `max_attempts`. Returns the destination of each dropped unicast.
    pub fn drop_over_attempt_limit(&mut self, max_attempts: u32) -> Vec<NodeId> {
        let mut failed = Vec::new();
        self.packets.retain(|packet| {
            if packet.is_broadcast() {
                if packet.send_attempts > 0 {
                    debug!("Dropping broadcast packet after its send window");
                    return false;
                }
                return true;
            }
            if packet.send_attempts >= max_attempts {
                if let Some(node) = packet.frame.destination.node() {
                    failed.push(node);
                }
                return false;
            }
            true
        });
        failed
    }

    pub fn unicast_count(&self) -> usize {
        self.packets.iter().filter(|packet| !packet.is_broadcast()).count()
    }

    pub fn broadcast_count(&self) -> usize {
        self.packets.iter().filter(|packet| packet.is_broadcast()).count()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use wsn_core::Destination;

    fn frame(destination: Destination) -> MacFrame {
        MacFrame::data(1, destination, Bytes::from_static(b"payload"), 64)
    }

    #[test]
    fn test_overflow_rejected() {
        let mut buffer = TransmitBuffer::new(2);
        buffer.enqueue(frame(Destination::Node(2))).unwrap();
        buffer.enqueue(frame(Destination::Node(3))).unwrap();
        let err = buffer.enqueue(frame(Destination::Node(4))).unwrap_err();
        assert_eq!(err.capacity, 2);
        assert_eq!(err.frame.destination, Destination::Node(4));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_broadcast_never_resent_to_same_neighbor() {
        let mut buffer = TransmitBuffer::new(4);
        buffer.enqueue(frame(Destination::Broadcast)).unwrap();

        assert!(buffer.has_packet_for(5));
        buffer.mark_sent_broadcast(5).unwrap();
        assert!(!buffer.has_packet_for(5));
        assert!(buffer.has_packet_for(6));
        assert!(matches!(buffer.mark_sent_broadcast(5), Err(MacError::NoPacketFor(5))));
    }

    #[test]
    fn test_next_for_prefers_buffer_order() {
        let mut buffer = TransmitBuffer::new(4);
        buffer.enqueue(frame(Destination::Node(9))).unwrap();
        buffer.enqueue(frame(Destination::Broadcast)).unwrap();
        buffer.enqueue(frame(Destination::Node(5))).unwrap();

        let next = buffer.next_for(5).unwrap();
        assert!(next.is_broadcast());
        buffer.mark_sent_broadcast(5).unwrap();
        assert_eq!(buffer.next_for(5).unwrap().frame.destination, Destination::Node(5));
        assert!(buffer.next_for(7).unwrap().is_broadcast());
    }

    #[test]
    fn test_remove_unicast() {
        let mut buffer = TransmitBuffer::new(4);
        buffer.enqueue(frame(Destination::Node(3))).unwrap();
        assert!(buffer.remove_unicast(4).is_err());
        let removed = buffer.remove_unicast(3).unwrap();
        assert_eq!(removed.frame.destination, Destination::Node(3));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_unicast_dropped_at_attempt_limit() {
        let mut buffer = TransmitBuffer::new(4);
        buffer.enqueue(frame(Destination::Node(3))).unwrap();

        for _ in 0..2 {
            buffer.increment_all_attempts();
            assert!(buffer.drop_over_attempt_limit(3).is_empty());
        }
        buffer.increment_all_attempts();
        assert_eq!(buffer.drop_over_attempt_limit(3), vec![3]);
        assert!(buffer.is_empty());
        assert!(buffer.drop_over_attempt_limit(3).is_empty());
    }

    #[test]
    fn test_broadcast_dropped_silently_after_one_window() {
        let mut buffer = TransmitBuffer::new(4);
        buffer.enqueue(frame(Destination::Broadcast)).unwrap();
        assert!(buffer.drop_over_attempt_limit(3).is_empty());
        assert_eq!(buffer.len(), 1);

        buffer.increment_all_attempts();
        assert!(buffer.drop_over_attempt_limit(3).is_empty());
        assert!(buffer.is_empty());
    }
}
