//! fixed next-hop routing, useful as a baseline against the collection trees

use std::collections::VecDeque;

use bytes::Bytes;
use wsn_core::{Destination, NodeId, SendOutcome};

use crate::{
    DuplicateHistory, Result, RoutingConfig, RoutingError, RoutingHost, RoutingPacket, RoutingProtocol, RoutingTimer,
};

/// Every node forwards everything to `route_to_node`. The sink delivers.
pub struct StaticRouting {
    config: RoutingConfig,
    history: DuplicateHistory,
    buffer: VecDeque<RoutingPacket>,
    sending: bool,
    attempts: u32,
    sequence_number: u32,
}

impl StaticRouting {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            history: DuplicateHistory::new(config.duplicate_history_size),
            buffer: VecDeque::new(),
            sending: false,
            attempts: 0,
            sequence_number: 0,
            config,
        }
    }

    pub fn next_hop(&self) -> NodeId {
        self.config.route_to_node
    }

    fn buffer_packet<H: RoutingHost>(&mut self, host: &mut H, packet: RoutingPacket) {
        if self.buffer.len() >= self.config.buffer_size {
            log::warn!(
                "[node {}] <StaticRouting> Buffer full, dropping packet {} from origin {}",
                self.config.self_node_id,
                packet.sequence_number,
                packet.origin
            );
            host.count("StaticRouting buffer overflow");
            return;
        }
        self.buffer.push_back(packet);
    }

    fn send_packets<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        let next_hop = self.config.route_to_node;
        loop {
            let Some(head) = self.buffer.front() else {
                self.sending = false;
                return Ok(());
            };
            self.sending = true;

            if !self.config.implement_retries {
                if let Some(packet) = self.buffer.pop_front() {
                    self.transmit(host, packet, next_hop)?;
                }
                continue;
            }
            if self.attempts < self.config.max_packet_send_retries {
                let packet = head.clone();
                return self.transmit(host, packet, next_hop);
            }

            log::debug!(
                "[node {}] <StaticRouting> Reached {} attempts, dropping packet",
                self.config.self_node_id,
                self.config.max_packet_send_retries
            );
            self.buffer.pop_front();
            self.attempts = 0;
            host.count("StaticRouting dropped packet after max retries");
        }
    }

    fn transmit<H: RoutingHost>(&mut self, host: &mut H, mut packet: RoutingPacket, next_hop: NodeId) -> Result<()> {
        log::debug!(
            "[node {}] <StaticRouting> Sending packet {} (attempt {}) to node {}",
            self.config.self_node_id,
            packet.sequence_number,
            self.attempts,
            next_hop
        );
        packet.source = self.config.self_node_id;
        packet.next_hop = Destination::Node(next_hop);
        packet.destination = Destination::Node(next_hop);
        host.to_mac(packet.encode()?, Destination::Node(next_hop));
        Ok(())
    }
}

impl RoutingProtocol for StaticRouting {
    fn node_id(&self) -> NodeId {
        self.config.self_node_id
    }

    fn startup<H: RoutingHost>(&mut self, _host: &mut H) -> Result<()> {
        if !self.config.is_sink() && self.config.route_to_node == self.config.self_node_id {
            return Err(RoutingError::ProtocolViolation(format!(
                "node {} has no static route configured",
                self.config.self_node_id
            )));
        }
        log::trace!(
            "[node {}] <StaticRouting> Startup, routing to {}",
            self.config.self_node_id,
            self.config.route_to_node
        );
        self.sending = false;
        self.attempts = 0;
        Ok(())
    }

    /// The application destination is ignored, everything follows the route.
    fn from_app<H: RoutingHost>(&mut self, host: &mut H, payload: Bytes, _destination: Destination) -> Result<()> {
        if self.config.is_sink() {
            return Err(RoutingError::SinkCannotSend);
        }
        let sequence_number = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        let packet = RoutingPacket::data(
            self.config.self_node_id,
            Destination::Node(self.config.route_to_node),
            sequence_number,
            payload,
        );
        self.buffer_packet(host, packet);
        if !self.sending {
            self.send_packets(host)?;
        }
        Ok(())
    }

    fn from_mac<H: RoutingHost>(&mut self, host: &mut H, payload: Bytes) -> Result<()> {
        let mut packet = RoutingPacket::decode(&payload)?;
        let node = self.config.self_node_id;
        if packet.is_beacon() {
            return Err(RoutingError::ProtocolViolation(format!(
                "static routing received a beacon from {}",
                packet.source
            )));
        }
        if !packet.destination.is_node(node) {
            log::trace!(
                "[node {}] <StaticRouting> Ignoring packet from {} origin {}, addressed to {}",
                node,
                packet.source,
                packet.origin,
                packet.destination
            );
            return Ok(());
        }
        if self.history.check_and_record(&packet) {
            log::trace!(
                "[node {}] <StaticRouting> Discarding duplicate {} from origin {}",
                node,
                packet.sequence_number,
                packet.origin
            );
            return Ok(());
        }
        packet.hop_count += 1;

        if self.config.is_sink() {
            host.record("StaticRouting hop count", packet.hop_count as f64);
            host.deliver_to_app(packet);
            return Ok(());
        }

        log::trace!(
            "[node {}] <StaticRouting> Forwarding packet from {} origin {} to {}",
            node,
            packet.source,
            packet.origin,
            self.config.route_to_node
        );
        self.buffer_packet(host, packet);
        if !self.sending {
            self.send_packets(host)?;
        }
        Ok(())
    }

    fn on_send_result<H: RoutingHost>(&mut self, host: &mut H, neighbor: NodeId, outcome: SendOutcome) -> Result<()> {
        if self.config.implement_retries {
            match outcome {
                SendOutcome::Acked => {
                    log::trace!("[node {}] <StaticRouting> Packet ACKed by {}", self.config.self_node_id, neighbor);
                    self.buffer.pop_front();
                    self.attempts = 0;
                }
                SendOutcome::Failed => {
                    self.attempts += 1;
                    log::trace!(
                        "[node {}] <StaticRouting> Packet not ACKed by {}, attempts now {}",
                        self.config.self_node_id,
                        neighbor,
                        self.attempts
                    );
                }
            }
        }
        self.send_packets(host)
    }

    fn on_timer<H: RoutingHost>(&mut self, _host: &mut H, timer: RoutingTimer) -> Result<()> {
        Err(RoutingError::ProtocolViolation(format!(
            "static routing runs no timers, got {:?}",
            timer
        )))
    }

    fn reset_epoch<H: RoutingHost>(&mut self, host: &mut H) {
        log::info!(
            "[node {}] <StaticRouting> Out of energy, dropping {} buffered packets",
            self.config.self_node_id,
            self.buffer.len()
        );
        host.cancel_all_timers();
        for _ in self.buffer.drain(..) {
            host.count("StaticRouting dropped packet from buffer out of energy");
        }
        self.sending = false;
        self.attempts = 0;
    }

    fn finish<H: RoutingHost>(&mut self, host: &mut H) {
        host.record("StaticRouting packets left in buffer", self.buffer.len() as f64);
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
