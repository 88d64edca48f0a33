//! collection-tree routing: buffers application data, forwards it up the
//! tree, detects loops and drives the beacon sender, link estimator and
//! neighbor table

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wsn_core::{Destination, NodeId, SendOutcome};

use crate::{
    BeaconSender, CtpPolicy, DuplicateHistory, LinkEstimator, MmbcrPolicy, PacketKind, ParentPolicy, Result,
    RouteNotice, RouteTable, RoutingConfig, RoutingError, RoutingHost, RoutingPacket, RoutingProtocol, RoutingTimer,
};

macro_rules! routing_log {
    ($level:ident, $node:expr, $($arg:tt)+) => {
        log::$level!("[node {}] <{}> {}", $node.config.self_node_id, P::NAME, format_args!($($arg)+))
    };
}

pub type CtpRouting = RoutingNode<CtpPolicy>;
pub type MmbcrRouting = RoutingNode<MmbcrPolicy>;

/// Loop repairs triggered per (origin, sequence number), for the most
/// recent `capacity` packets that looped.
struct LoopRepairs {
    capacity: usize,
    counts: HashMap<(NodeId, u32), u32>,
    order: VecDeque<(NodeId, u32)>,
}

impl LoopRepairs {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            counts: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Counts one more repair for the packet and returns its total.
    fn record(&mut self, origin: NodeId, sequence_number: u32) -> u32 {
        let key = (origin, sequence_number);
        if !self.counts.contains_key(&key) {
            if self.order.len() == self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.counts.remove(&oldest);
                }
            }
            self.order.push_back(key);
        }
        let repairs = self.counts.entry(key).or_insert(0);
        *repairs += 1;
        *repairs
    }

    fn len(&self) -> usize {
        self.counts.len()
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.order.clear();
    }
}

pub struct RoutingNode<P: ParentPolicy> {
    config: RoutingConfig,
    table: RouteTable<P>,
    estimator: LinkEstimator,
    beacons: BeaconSender,
    history: DuplicateHistory,
    notices: VecDeque<RouteNotice>,
    buffer: VecDeque<RoutingPacket>,
    loop_repairs: LoopRepairs,
    sending: bool,
    waiting_for_loop_repair: bool,
    parent: Option<NodeId>,
    multihop_etx: Option<f64>,
    attempts: u32,
    sequence_number: u32,
    rng: StdRng,
}

impl RoutingNode<CtpPolicy> {
    pub fn ctp(config: RoutingConfig, seed: u64) -> Self {
        let policy = CtpPolicy {
            switch_margin: config.parent_switch_margin,
        };
        Self::new(config, policy, seed)
    }
}

impl RoutingNode<MmbcrPolicy> {
    pub fn mmbcr(config: RoutingConfig, seed: u64) -> Self {
        let policy = MmbcrPolicy {
            weighting_mmbcr: config.weighting_mmbcr,
            weighting_mh_etx: config.weighting_mh_etx,
            switch_threshold: config.parent_switch_threshold,
        };
        Self::new(config, policy, seed)
    }
}

impl<P: ParentPolicy> RoutingNode<P> {
    pub fn new(config: RoutingConfig, policy: P, seed: u64) -> Self {
        Self {
            table: RouteTable::new(&config, policy, seed.wrapping_add(1)),
            estimator: LinkEstimator::new(&config),
            beacons: BeaconSender::new(&config, P::CARRIES_BATTERY_CHAIN, seed.wrapping_add(2)),
            history: DuplicateHistory::new(config.duplicate_history_size),
            notices: VecDeque::new(),
            buffer: VecDeque::new(),
            loop_repairs: LoopRepairs::new(config.buffer_size),
            sending: false,
            waiting_for_loop_repair: false,
            parent: None,
            multihop_etx: None,
            attempts: 0,
            sequence_number: 0,
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn multihop_etx(&self) -> Option<f64> {
        self.multihop_etx
    }

    pub fn table(&self) -> &RouteTable<P> {
        &self.table
    }

    pub fn is_repairing_loop(&self) -> bool {
        self.waiting_for_loop_repair
    }

    fn is_sink(&self) -> bool {
        self.config.is_sink()
    }

    fn process_notices<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        while let Some(notice) = self.notices.pop_front() {
            match notice {
                RouteNotice::MultihopEtx(multihop_etx) => self.beacons.set_multihop_etx(multihop_etx),
                RouteNotice::NewParent(parent) => self.beacons.new_parent(host, parent)?,
                RouteNotice::ResetTrickleAndPull => self.beacons.reset_and_pull(host)?,
                RouteNotice::ParentBatteryChain(chain) => self.beacons.set_parent_chain(chain),
                RouteNotice::Route { parent, multihop_etx } => {
                    routing_log!(debug, self, "Route update: parent {:?}, MH-ETX {:?}", parent, multihop_etx);
                    self.parent = parent;
                    self.multihop_etx = multihop_etx;
                    if !self.sending {
                        self.send_packets(host)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn buffer_packet<H: RoutingHost>(&mut self, host: &mut H, packet: RoutingPacket) -> bool {
        if self.buffer.len() >= self.config.buffer_size {
            routing_log!(
                warn,
                self,
                "Buffer full, dropping packet {} from origin {}",
                packet.sequence_number,
                packet.origin
            );
            host.count("CtpRouting buffer overflow");
            return false;
        }
        self.buffer.push_back(packet);
        true
    }

    fn send_packets<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        loop {
            let Some(parent) = self.parent else {
                routing_log!(trace, self, "No parent yet, keeping {} packets buffered", self.buffer.len());
                return Ok(());
            };
            if self.waiting_for_loop_repair {
                routing_log!(trace, self, "Sending blocked while repairing a loop");
                return Ok(());
            }
            let Some(head) = self.buffer.front() else {
                self.sending = false;
                return Ok(());
            };

            if !self.config.implement_retries {
                if let Some(packet) = self.buffer.pop_front() {
                    self.transmit(host, packet, parent)?;
                }
                continue;
            }
            if self.attempts < self.config.max_packet_send_retries {
                let packet = head.clone();
                self.sending = true;
                return self.transmit(host, packet, parent);
            }

            routing_log!(
                debug,
                self,
                "Dropping packet after {} attempts",
                self.config.max_packet_send_retries
            );
            self.buffer.pop_front();
            self.attempts = 0;
            host.count("CtpRouting dropped packet after max retries");
        }
    }

    fn transmit<H: RoutingHost>(&mut self, host: &mut H, mut packet: RoutingPacket, parent: NodeId) -> Result<()> {
        routing_log!(
            debug,
            self,
            "Sending packet (attempt {}): origin {}, seq {}, hop count {} to parent {}",
            self.attempts,
            packet.origin,
            packet.sequence_number,
            packet.hop_count,
            parent
        );
        packet.source = self.config.self_node_id;
        packet.next_hop = Destination::Node(parent);
        packet.multihop_etx = self.multihop_etx;
        host.to_mac(packet.encode()?, Destination::Node(parent));
        Ok(())
    }

    fn forward<H: RoutingHost>(&mut self, host: &mut H, packet: RoutingPacket) -> Result<()> {
        routing_log!(
            debug,
            self,
            "Forwarding packet {} from {}, origin {}",
            packet.sequence_number,
            packet.source,
            packet.origin
        );
        host.count("CtpRouting received packet for forwarding");

        // MH-ETX strictly decreases towards the sink
        let looped = match (packet.multihop_etx, self.multihop_etx) {
            (Some(theirs), Some(ours)) => theirs <= ours,
            _ => false,
        };
        if !looped {
            if self.buffer_packet(host, packet) && !self.sending {
                self.send_packets(host)?;
            }
            return Ok(());
        }

        routing_log!(
            warn,
            self,
            "Routing loop detected: our MH-ETX {:?}, sender {} advertised {:?}",
            self.multihop_etx,
            packet.source,
            packet.multihop_etx
        );
        let repairs = self.loop_repairs.record(packet.origin, packet.sequence_number);
        if repairs > self.config.max_loop_repairs_per_packet {
            routing_log!(
                warn,
                self,
                "Packet {} from origin {} keeps looping, dropping it",
                packet.sequence_number,
                packet.origin
            );
            host.count("CtpRouting dropped looping packet");
            return Ok(());
        }
        self.buffer_packet(host, packet);
        self.repair_loop(host)
    }

    fn repair_loop<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        self.waiting_for_loop_repair = true;
        self.beacons.reset_and_pull(host)?;
        let wait = self.config.repair_loop_wait(self.rng.random::<f64>());
        routing_log!(debug, self, "Suspending sends for {:?} while the loop repairs", wait);
        host.stop_timer(RoutingTimer::LoopRepair);
        host.start_timer(RoutingTimer::LoopRepair, wait)?;
        Ok(())
    }

    fn on_beacon<H: RoutingHost>(&mut self, host: &mut H, beacon: RoutingPacket) -> Result<()> {
        routing_log!(trace, self, "Beacon {} from {}", beacon.sequence_number, beacon.source);
        self.estimator
            .on_beacon(host, &beacon, &mut self.table, &mut self.notices);
        if P::CARRIES_BATTERY_CHAIN {
            self.table
                .update_battery_chain(host, beacon.source, beacon.battery_chain, &mut self.notices);
        }
        self.process_notices(host)?;

        if beacon.pull {
            routing_log!(debug, self, "Beacon from {} asked for a pull, resetting trickle", beacon.source);
            self.beacons.reset(host)?;
        }
        Ok(())
    }

    fn on_data<H: RoutingHost>(&mut self, host: &mut H, packet: RoutingPacket) -> Result<()> {
        if !packet.next_hop.is_node(self.config.self_node_id) {
            routing_log!(trace, self, "Snooped packet addressed to {}", packet.next_hop);
            return Ok(());
        }
        if self.is_sink() {
            routing_log!(debug, self, "Sink received packet from origin {}", packet.origin);
            host.record("CtpRouting hop count", packet.hop_count as f64);
            host.deliver_to_app(packet);
            return Ok(());
        }
        self.forward(host, packet)
    }

    fn start_route_discovery<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        routing_log!(debug, self, "Starting route discovery");
        self.beacons.reset_and_pull(host)
    }
}

impl<P: ParentPolicy> RoutingProtocol for RoutingNode<P> {
    fn node_id(&self) -> NodeId {
        self.config.self_node_id
    }

    fn startup<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        self.sending = false;
        self.waiting_for_loop_repair = false;
        self.attempts = 0;
        if self.is_sink() {
            self.parent = Some(self.config.self_node_id);
            self.multihop_etx = Some(0.0);
        } else {
            self.parent = None;
            self.multihop_etx = None;
        }

        if self.config.delay_before_route_discovery.is_zero() {
            self.start_route_discovery(host)
        } else {
            host.start_timer(RoutingTimer::DelayRouteDiscovery, self.config.delay_before_route_discovery)?;
            Ok(())
        }
    }

    fn from_app<H: RoutingHost>(&mut self, host: &mut H, payload: Bytes, destination: Destination) -> Result<()> {
        let sink = self.config.sink_node_id;
        if !destination.is_node(sink) {
            return Err(RoutingError::NotForSink { destination, sink });
        }
        if self.is_sink() {
            return Err(RoutingError::SinkCannotSend);
        }

        let sequence_number = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        let packet = RoutingPacket::data(self.config.self_node_id, destination, sequence_number, payload);
        routing_log!(trace, self, "Packet {} from application, parent {:?}", sequence_number, self.parent);

        if self.buffer_packet(host, packet) && !self.sending {
            self.send_packets(host)?;
        }
        Ok(())
    }

    fn from_mac<H: RoutingHost>(&mut self, host: &mut H, payload: Bytes) -> Result<()> {
        let mut packet = RoutingPacket::decode(&payload)?;
        packet.hop_count += 1;
        if self.history.check_and_record(&packet) {
            routing_log!(
                trace,
                self,
                "Dropping duplicate {:?} {} from origin {}, hop count {}",
                packet.kind,
                packet.sequence_number,
                packet.origin,
                packet.hop_count
            );
            return Ok(());
        }

        match packet.kind {
            PacketKind::Beacon => self.on_beacon(host, packet),
            PacketKind::Data => self.on_data(host, packet),
        }
    }

    fn on_send_result<H: RoutingHost>(&mut self, host: &mut H, neighbor: NodeId, outcome: SendOutcome) -> Result<()> {
        self.sending = false;
        match outcome {
            SendOutcome::Acked => {
                routing_log!(trace, self, "Packet ACKed by {}", neighbor);
                if self.config.implement_retries {
                    self.buffer.pop_front();
                    self.attempts = 0;
                }
            }
            SendOutcome::Failed => {
                if self.config.implement_retries {
                    self.attempts += 1;
                    routing_log!(debug, self, "Packet not ACKed by {}, attempts now {}", neighbor, self.attempts);
                    host.count("CtpRouting retrying send");
                }
            }
        }
        self.send_packets(host)?;

        self.estimator
            .on_send_result(host, neighbor, outcome, &mut self.table, &mut self.notices);
        self.process_notices(host)
    }

    fn on_timer<H: RoutingHost>(&mut self, host: &mut H, timer: RoutingTimer) -> Result<()> {
        match timer {
            RoutingTimer::LoopRepair => {
                routing_log!(debug, self, "Loop repair wait over");
                self.waiting_for_loop_repair = false;
                if !self.sending {
                    self.send_packets(host)?;
                }
            }
            RoutingTimer::DelayRouteDiscovery => self.start_route_discovery(host)?,
            RoutingTimer::SendNextBeacon => self.beacons.on_timer(host)?,
        }
        self.process_notices(host)
    }

    fn reset_epoch<H: RoutingHost>(&mut self, host: &mut H) {
        routing_log!(info, self, "Out of energy, dropping {} buffered packets", self.buffer.len());
        host.cancel_all_timers();
        for _ in self.buffer.drain(..) {
            host.count("CtpRouting dropped packet from buffer out of energy");
        }
        self.estimator.reset();
        self.table.reset();
        self.beacons.reset_epoch();
        self.notices.clear();
        self.loop_repairs.clear();
        self.sending = false;
        self.waiting_for_loop_repair = false;
        self.attempts = 0;
        if self.is_sink() {
            self.parent = Some(self.config.self_node_id);
            self.multihop_etx = Some(0.0);
        } else {
            self.parent = None;
            self.multihop_etx = None;
        }
    }

    fn finish<H: RoutingHost>(&mut self, host: &mut H) {
        host.record("CtpRouting packets left in buffer", self.buffer.len() as f64);
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
