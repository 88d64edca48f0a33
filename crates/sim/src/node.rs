//! node supervisor: one MAC and one routing instance wired together
//!
//! The MAC and the routing layer never call each other. Everything one
//! hands to the other is queued as a [`Signal`] and drained once the
//! current handler has returned, so every entry point runs to completion.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Buf, Bytes};
use wsn_core::{
    ArmedTimer, CcaResult, Destination, NodeId, Radio, RadioState, SendOutcome, Stats, StatsSink, TimerBank,
    TimerError, TimerKind, TimerService,
};
use wsn_mac::{Admission, MacFrame, MacHost, MacProtocol, UpperLayer};
use wsn_routing::{RoutingHost, RoutingPacket, RoutingProtocol, RoutingTimer};

use crate::SimError;

#[derive(Debug)]
enum Signal {
    /// MAC -> routing
    Deliver(MacFrame),
    /// MAC -> routing
    SendResult(NodeId, SendOutcome),
    /// routing -> MAC
    ToMac(Bytes, Destination),
}

/// Radio, timers and queues of one node, shared by its two layers.
pub struct NodeIo<K: TimerKind> {
    id: NodeId,
    mac_timers: TimerBank<K>,
    routing_timers: TimerBank<RoutingTimer>,
    radio: RadioState,
    rx_since: Duration,
    transmitting: Option<u64>,
    /// State the radio falls back to once the current frame is on air.
    after_tx: RadioState,
    outbox: Vec<MacFrame>,
    signals: VecDeque<Signal>,
    channel_busy: bool,
    cca_settle: Duration,
    battery: f64,
    drain_per_frame: f64,
    stats: Stats,
}

impl<K: TimerKind> NodeIo<K> {
    fn new(id: NodeId, cca_settle: Duration, drain_per_frame: f64) -> Self {
        Self {
            id,
            mac_timers: TimerBank::new(),
            routing_timers: TimerBank::new(),
            radio: RadioState::Sleep,
            rx_since: Duration::ZERO,
            transmitting: None,
            after_tx: RadioState::Rx,
            outbox: Vec::new(),
            signals: VecDeque::new(),
            channel_busy: false,
            cca_settle,
            battery: 1.0,
            drain_per_frame,
            stats: Stats::new(),
        }
    }

    fn now(&self) -> Duration {
        self.mac_timers.now()
    }

    fn advance_to(&mut self, now: Duration) {
        self.mac_timers.advance_to(now);
        self.routing_timers.advance_to(now);
    }

    fn set_radio(&mut self, state: RadioState) {
        if self.transmitting.is_some() {
            self.after_tx = state;
            return;
        }
        match state {
            RadioState::Tx => {
                log::warn!("[node {}] Radio asked for TX without a frame, ignoring", self.id);
            }
            RadioState::Rx if self.radio != RadioState::Rx => {
                self.radio = RadioState::Rx;
                self.rx_since = self.now();
            }
            _ => self.radio = state,
        }
    }

    fn start_tx(&mut self, frame: MacFrame) {
        if self.transmitting.is_some() || !self.outbox.is_empty() {
            log::warn!("[node {}] Radio already transmitting, dropping {} frame", self.id, frame.kind);
            self.stats.count("Radio dropped frame while transmitting");
            return;
        }
        self.after_tx = RadioState::Rx;
        self.radio = RadioState::Tx;
        self.battery = (self.battery - self.drain_per_frame).max(0.0);
        self.stats.count_labelled("Radio frames sent", &frame.kind.to_string());
        self.outbox.push(frame);
    }

    fn cca(&self) -> CcaResult {
        if self.transmitting.is_some() || !self.outbox.is_empty() || self.radio != RadioState::Rx {
            CcaResult::NotValid
        } else if self.now().saturating_sub(self.rx_since) < self.cca_settle {
            CcaResult::NotValidYet
        } else if self.channel_busy {
            CcaResult::Busy
        } else {
            CcaResult::Clear
        }
    }

    /// In RX without interruption since `since`.
    pub fn listening_since(&self, since: Duration) -> bool {
        self.radio == RadioState::Rx && self.transmitting.is_none() && self.rx_since <= since
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio
    }

    pub fn battery_fraction(&self) -> f64 {
        self.battery
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

impl<K: TimerKind> StatsSink for NodeIo<K> {
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

/// The node as seen from its MAC.
struct MacPort<'a, K: TimerKind>(&'a mut NodeIo<K>);

impl<K: TimerKind> Radio for MacPort<'_, K> {
    fn set_radio_state(&mut self, state: RadioState) {
        self.0.set_radio(state);
    }

    fn sample_cca(&mut self) -> CcaResult {
        self.0.cca()
    }
}

impl<K: TimerKind> TimerService<K> for MacPort<'_, K> {
    fn start_timer(&mut self, kind: K, after: Duration) -> Result<(), TimerError> {
        self.0.mac_timers.start_timer(kind, after)
    }

    fn stop_timer(&mut self, kind: K) {
        self.0.mac_timers.stop_timer(kind)
    }

    fn is_timer_running(&self, kind: K) -> bool {
        self.0.mac_timers.is_timer_running(kind)
    }

    fn timer_remaining(&self, kind: K) -> Result<Duration, TimerError> {
        self.0.mac_timers.timer_remaining(kind)
    }

    fn pause_timer(&mut self, kind: K) -> Result<(), TimerError> {
        self.0.mac_timers.pause_timer(kind)
    }

    fn resume_timer(&mut self, kind: K) -> Result<(), TimerError> {
        self.0.mac_timers.resume_timer(kind)
    }

    fn is_timer_paused(&self, kind: K) -> bool {
        self.0.mac_timers.is_timer_paused(kind)
    }

    fn cancel_all_timers(&mut self) {
        self.0.mac_timers.cancel_all_timers()
    }
}

impl<K: TimerKind> UpperLayer for MacPort<'_, K> {
    fn deliver(&mut self, frame: MacFrame) {
        self.0.signals.push_back(Signal::Deliver(frame));
    }

    fn report_send_result(&mut self, neighbor: NodeId, outcome: SendOutcome) {
        self.0.signals.push_back(Signal::SendResult(neighbor, outcome));
    }
}

impl<K: TimerKind> StatsSink for MacPort<'_, K> {
    fn count(&mut self, name: &str) {
        self.0.count(name);
    }

    fn count_labelled(&mut self, name: &str, label: &str) {
        self.0.count_labelled(name, label);
    }

    fn record(&mut self, name: &str, value: f64) {
        self.0.record(name, value);
    }
}

impl<K: TimerKind> MacHost<K> for MacPort<'_, K> {
    fn now(&self) -> Duration {
        self.0.now()
    }

    fn transmit(&mut self, frame: MacFrame) {
        self.0.start_tx(frame);
    }
}

/// The node as seen from its routing layer.
struct RoutingPort<'a, K: TimerKind>(&'a mut NodeIo<K>);

impl<K: TimerKind> TimerService<RoutingTimer> for RoutingPort<'_, K> {
    fn start_timer(&mut self, kind: RoutingTimer, after: Duration) -> Result<(), TimerError> {
        self.0.routing_timers.start_timer(kind, after)
    }

    fn stop_timer(&mut self, kind: RoutingTimer) {
        self.0.routing_timers.stop_timer(kind)
    }

    fn is_timer_running(&self, kind: RoutingTimer) -> bool {
        self.0.routing_timers.is_timer_running(kind)
    }

    fn timer_remaining(&self, kind: RoutingTimer) -> Result<Duration, TimerError> {
        self.0.routing_timers.timer_remaining(kind)
    }

    fn pause_timer(&mut self, kind: RoutingTimer) -> Result<(), TimerError> {
        self.0.routing_timers.pause_timer(kind)
    }

    fn resume_timer(&mut self, kind: RoutingTimer) -> Result<(), TimerError> {
        self.0.routing_timers.resume_timer(kind)
    }

    fn is_timer_paused(&self, kind: RoutingTimer) -> bool {
        self.0.routing_timers.is_timer_paused(kind)
    }

    fn cancel_all_timers(&mut self) {
        self.0.routing_timers.cancel_all_timers()
    }
}

impl<K: TimerKind> StatsSink for RoutingPort<'_, K> {
    fn count(&mut self, name: &str) {
        self.0.count(name);
    }

    fn count_labelled(&mut self, name: &str, label: &str) {
        self.0.count_labelled(name, label);
    }

    fn record(&mut self, name: &str, value: f64) {
        self.0.record(name, value);
    }
}

impl<K: TimerKind> RoutingHost for RoutingPort<'_, K> {
    fn now(&self) -> Duration {
        self.0.now()
    }

    fn to_mac(&mut self, payload: Bytes, destination: Destination) {
        self.0.signals.push_back(Signal::ToMac(payload, destination));
    }

    fn deliver_to_app(&mut self, packet: RoutingPacket) {
        let now = self.0.now();
        let io = &mut *self.0;
        io.stats.count("Application packets received");
        io.stats
            .count_labelled("Application packets received from", &packet.origin.to_string());
        if let Some(sent_at) = read_timestamp(&packet.payload) {
            io.stats
                .record("Application latency ms", now.saturating_sub(sent_at).as_secs_f64() * 1000.0);
        }
    }

    fn battery_fraction(&self) -> f64 {
        self.0.battery
    }
}

/// Application payloads start with their creation time in microseconds.
pub fn application_payload(now: Duration, size: usize) -> Bytes {
    let mut payload = vec![0u8; size.max(8)];
    payload[..8].copy_from_slice(&(now.as_micros() as u64).to_be_bytes());
    Bytes::from(payload)
}

fn read_timestamp(payload: &Bytes) -> Option<Duration> {
    if payload.len() < 8 {
        return None;
    }
    let mut reader = payload.clone();
    Some(Duration::from_micros(reader.get_u64()))
}

pub struct Node<M: MacProtocol, R: RoutingProtocol> {
    mac: M,
    routing: R,
    io: NodeIo<M::Timer>,
    powered: bool,
}

impl<M: MacProtocol, R: RoutingProtocol> Node<M, R> {
    pub fn new(mac: M, routing: R, cca_settle: Duration, drain_per_frame: f64) -> Self {
        let id = mac.node_id();
        Self {
            io: NodeIo::new(id, cca_settle, drain_per_frame),
            mac,
            routing,
            powered: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.io.id
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn io(&self) -> &NodeIo<M::Timer> {
        &self.io
    }

    pub fn mac(&self) -> &M {
        &self.mac
    }

    pub fn routing(&self) -> &R {
        &self.routing
    }

    pub fn stats(&self) -> &Stats {
        &self.io.stats
    }

    /// Moves the node's clock and refreshes what its radio senses.
    pub fn prepare(&mut self, now: Duration, channel_busy: bool) {
        self.io.advance_to(now);
        self.io.channel_busy = channel_busy;
    }

    pub fn power_restore(&mut self) -> Result<(), SimError> {
        if self.powered {
            return Ok(());
        }
        log::info!("[node {}] Powering up at {:?}", self.id(), self.io.now());
        self.powered = true;
        self.io.radio = RadioState::Sleep;
        self.io.stats.count("Node power up");
        let node = self.id();
        self.mac
            .startup(&mut MacPort(&mut self.io))
            .map_err(|source| SimError::Mac { node, source })?;
        self.routing
            .startup(&mut RoutingPort(&mut self.io))
            .map_err(|source| SimError::Routing { node, source })?;
        self.drain()
    }

    pub fn power_loss(&mut self) {
        if !self.powered {
            return;
        }
        log::info!("[node {}] Out of energy at {:?}", self.id(), self.io.now());
        self.powered = false;
        self.io.stats.count("Node power loss");
        self.mac.reset_epoch(&mut MacPort(&mut self.io));
        self.routing.reset_epoch(&mut RoutingPort(&mut self.io));
        self.io.mac_timers.cancel_all_timers();
        self.io.routing_timers.cancel_all_timers();
        self.io.mac_timers.take_armed();
        self.io.routing_timers.take_armed();
        self.io.signals.clear();
        self.io.outbox.clear();
        self.io.transmitting = None;
        self.io.radio = RadioState::Sleep;
    }

    pub fn on_mac_timer(&mut self, armed: &ArmedTimer<M::Timer>) -> Result<(), SimError> {
        if !self.powered || !self.io.mac_timers.fire(armed) {
            return Ok(());
        }
        let node = self.id();
        self.mac
            .on_timer(&mut MacPort(&mut self.io), armed.kind)
            .map_err(|source| SimError::Mac { node, source })?;
        self.drain()
    }

    pub fn on_routing_timer(&mut self, armed: &ArmedTimer<RoutingTimer>) -> Result<(), SimError> {
        if !self.powered || !self.io.routing_timers.fire(armed) {
            return Ok(());
        }
        let node = self.id();
        self.routing
            .on_timer(&mut RoutingPort(&mut self.io), armed.kind)
            .map_err(|source| SimError::Routing { node, source })?;
        self.drain()
    }

    pub fn on_frame(&mut self, frame: MacFrame) -> Result<(), SimError> {
        if !self.powered {
            return Ok(());
        }
        let node = self.id();
        self.mac
            .on_frame(&mut MacPort(&mut self.io), frame)
            .map_err(|source| SimError::Mac { node, source })?;
        self.drain()
    }

    /// Application data from this node.
    pub fn app_send(&mut self, payload: Bytes, destination: Destination) -> Result<(), SimError> {
        if !self.powered {
            return Ok(());
        }
        let node = self.id();
        self.io.stats.count("Application packets generated");
        self.routing
            .from_app(&mut RoutingPort(&mut self.io), payload, destination)
            .map_err(|source| SimError::Routing { node, source })?;
        self.drain()
    }

    /// Called by the medium once the frame with `id` is fully on air.
    pub fn on_tx_complete(&mut self, id: u64) {
        if self.io.transmitting != Some(id) {
            return;
        }
        self.io.transmitting = None;
        let next = self.io.after_tx;
        self.io.radio = RadioState::Sleep;
        self.io.set_radio(next);
    }

    /// Frames the MAC put on air since the last call. The caller assigns
    /// each one a transmission id.
    pub fn take_outbox(&mut self) -> Option<MacFrame> {
        self.io.outbox.pop()
    }

    pub fn set_transmission(&mut self, id: u64) {
        self.io.transmitting = Some(id);
    }

    pub fn take_armed(&mut self) -> (Vec<ArmedTimer<M::Timer>>, Vec<ArmedTimer<RoutingTimer>>) {
        (self.io.mac_timers.take_armed(), self.io.routing_timers.take_armed())
    }

    pub fn finish(&mut self) {
        self.mac.finish(&mut MacPort(&mut self.io));
        self.routing.finish(&mut RoutingPort(&mut self.io));
    }

    fn drain(&mut self) -> Result<(), SimError> {
        let node = self.id();
        while let Some(signal) = self.io.signals.pop_front() {
            match signal {
                Signal::Deliver(frame) => self
                    .routing
                    .from_mac(&mut RoutingPort(&mut self.io), frame.payload)
                    .map_err(|source| SimError::Routing { node, source })?,
                Signal::SendResult(neighbor, outcome) => self
                    .routing
                    .on_send_result(&mut RoutingPort(&mut self.io), neighbor, outcome)
                    .map_err(|source| SimError::Routing { node, source })?,
                Signal::ToMac(payload, destination) => {
                    let admission = self
                        .mac
                        .submit(&mut MacPort(&mut self.io), payload, destination)
                        .map_err(|source| SimError::Mac { node, source })?;
                    // routing expects a result for every unicast it hands down
                    if let (Admission::Overflow, Destination::Node(neighbor)) = (admission, destination) {
                        self.io
                            .signals
                            .push_back(Signal::SendResult(neighbor, SendOutcome::Failed));
                    }
                }
            }
        }
        Ok(())
    }
}
