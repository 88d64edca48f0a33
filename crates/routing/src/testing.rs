//! recording host used by the routing unit tests

use std::time::Duration;

use bytes::Bytes;
use wsn_core::{Destination, Stats, StatsSink, TimerBank, TimerError, TimerService};

use crate::{RoutingHost, RoutingPacket, RoutingTimer};

pub struct MockHost {
    pub timers: TimerBank<RoutingTimer>,
    pub sent: Vec<(Bytes, Destination)>,
    pub delivered: Vec<RoutingPacket>,
    pub battery: f64,
    pub stats: Stats,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            timers: TimerBank::new(),
            sent: Vec::new(),
            delivered: Vec::new(),
            battery: 1.0,
            stats: Stats::new(),
        }
    }

    pub fn sent_packets(&self) -> Vec<RoutingPacket> {
        self.sent
            .iter()
            .map(|(payload, _)| RoutingPacket::decode(payload).expect("undecodable packet"))
            .collect()
    }

    /// Unicast data handed to the MAC, with its link destination.
    pub fn sent_data(&self) -> Vec<(RoutingPacket, Destination)> {
        self.sent
            .iter()
            .map(|(payload, destination)| (RoutingPacket::decode(payload).expect("undecodable packet"), *destination))
            .filter(|(packet, _)| !packet.is_beacon())
            .collect()
    }

    pub fn advance(&mut self, by: Duration) {
        let now = self.timers.now() + by;
        self.timers.advance_to(now);
    }
}

impl TimerService<RoutingTimer> for MockHost {
    fn start_timer(&mut self, kind: RoutingTimer, after: Duration) -> Result<(), TimerError> {
        self.timers.start_timer(kind, after)
    }

    fn stop_timer(&mut self, kind: RoutingTimer) {
        self.timers.stop_timer(kind)
    }

    fn is_timer_running(&self, kind: RoutingTimer) -> bool {
        self.timers.is_timer_running(kind)
    }

    fn timer_remaining(&self, kind: RoutingTimer) -> Result<Duration, TimerError> {
        self.timers.timer_remaining(kind)
    }

    fn pause_timer(&mut self, kind: RoutingTimer) -> Result<(), TimerError> {
        self.timers.pause_timer(kind)
    }

    fn resume_timer(&mut self, kind: RoutingTimer) -> Result<(), TimerError> {
        self.timers.resume_timer(kind)
    }

    fn is_timer_paused(&self, kind: RoutingTimer) -> bool {
        self.timers.is_timer_paused(kind)
    }

    fn cancel_all_timers(&mut self) {
        self.timers.cancel_all_timers()
    }
}

impl StatsSink for MockHost {
    fn count(&mut self, name: &str) {
        self.stats.count(name);
    }

    fn count_labelled(&mut self, name: &str, label: &str) {
        self.stats.count_labelled(name, label);
    }

    fn record(&mut self, name: &str, value: f64) {
        self.stats.record(name, value);
    }
}

impl RoutingHost for MockHost {
    fn now(&self) -> Duration {
        self.timers.now()
    }

    fn to_mac(&mut self, payload: Bytes, destination: Destination) {
        self.sent.push((payload, destination));
    }

    fn deliver_to_app(&mut self, packet: RoutingPacket) {
        self.delivered.push(packet);
    }

    fn battery_fraction(&self) -> f64 {
        self.battery
    }
}
