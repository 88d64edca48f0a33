//! route advertisement beacons on a trickle schedule

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wsn_core::{Destination, NodeId};

use crate::{Result, RoutingConfig, RoutingHost, RoutingPacket, RoutingTimer};

/// Broadcasts our MH-ETX, parent and (for MMBCR) battery chain.
///
/// The beacon interval is drawn from [c/2, c]. `c` doubles after every
/// beacon up to `trickle_max` and falls back to `trickle_min` on a reset.
pub struct BeaconSender {
    node: NodeId,
    is_sink: bool,
    carries_battery_chain: bool,
    trickle_min: Duration,
    trickle_max: Duration,
    static_frequency: bool,
    coefficient: Duration,
    /// Survives energy loss so neighbors keep a monotonic beacon sequence.
    sequence_number: u32,
    multihop_etx: Option<f64>,
    parent: Option<NodeId>,
    pull: bool,
    parent_chain: Vec<f64>,
    own_chain: Vec<f64>,
    rng: StdRng,
}

impl BeaconSender {
    pub fn new(config: &RoutingConfig, carries_battery_chain: bool, seed: u64) -> Self {
        let mut sender = Self {
            node: config.self_node_id,
            is_sink: config.is_sink(),
            carries_battery_chain,
            trickle_min: config.trickle_min,
            trickle_max: config.trickle_max.max(config.trickle_min),
            static_frequency: config.static_frequency,
            coefficient: config.trickle_min,
            sequence_number: 0,
            multihop_etx: None,
            parent: None,
            pull: false,
            parent_chain: Vec::new(),
            own_chain: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        };
        sender.reset_epoch();
        sender
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn coefficient(&self) -> Duration {
        self.coefficient
    }

    pub fn set_multihop_etx(&mut self, multihop_etx: Option<f64>) {
        log::trace!("[node {}] <BeaconSender> Advertising MH-ETX {:?}", self.node, multihop_etx);
        self.multihop_etx = multihop_etx;
    }

    pub fn set_parent_chain(&mut self, chain: Vec<f64>) {
        self.parent_chain = chain;
    }

    pub fn new_parent<H: RoutingHost>(&mut self, host: &mut H, parent: NodeId) -> Result<()> {
        log::debug!("[node {}] <BeaconSender> New parent {}, resetting trickle", self.node, parent);
        self.parent = Some(parent);
        self.reset(host)
    }

    pub fn reset_and_pull<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        self.pull = true;
        self.reset(host)
    }

    pub fn reset<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        host.stop_timer(RoutingTimer::SendNextBeacon);
        self.coefficient = self.trickle_min;
        self.send_next(host)
    }

    pub fn on_timer<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        self.send_next(host)
    }

    /// Energy loss. The sequence number is kept.
    pub fn reset_epoch(&mut self) {
        self.multihop_etx = if self.is_sink { Some(0.0) } else { None };
        self.parent = None;
        self.pull = false;
        self.coefficient = self.trickle_min;
        self.parent_chain.clear();
        self.own_chain.clear();
    }

    fn send_next<H: RoutingHost>(&mut self, host: &mut H) -> Result<()> {
        self.update_own_chain(host);

        let lower = self.coefficient / 2;
        let interval = lower + (self.coefficient - lower).mul_f64(self.rng.random::<f64>());

        let mut beacon = RoutingPacket::beacon(self.node, self.sequence_number);
        self.sequence_number = self.sequence_number.wrapping_add(1);
        beacon.multihop_etx = self.multihop_etx;
        beacon.parent = self.parent;
        beacon.battery_chain = self.own_chain.clone();
        beacon.pull = std::mem::take(&mut self.pull);

        log::debug!(
            "[node {}] <BeaconSender> Beacon {}{}, next in {:?}",
            self.node,
            beacon.sequence_number,
            if beacon.pull { " with pull" } else { "" },
            interval
        );
        host.to_mac(beacon.encode()?, Destination::Broadcast);
        host.start_timer(RoutingTimer::SendNextBeacon, interval)?;

        if !self.static_frequency {
            self.coefficient = (self.coefficient * 2).min(self.trickle_max);
        }
        Ok(())
    }

    fn update_own_chain<H: RoutingHost>(&mut self, host: &H) {
        if !self.carries_battery_chain || self.is_sink || self.parent.is_none() {
            self.own_chain.clear();
            return;
        }
        self.own_chain = self.parent_chain.clone();
        self.own_chain.push(host.battery_fraction());
    }
}
