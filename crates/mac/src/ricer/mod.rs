//! RICER: receiver-initiated, duty-cycled MAC
//!
//! Receivers wake periodically, sense the channel and broadcast a
//! ready-to-receive (RTR) beacon. Senders keep their radio in RX while they
//! have buffered data and transmit when they hear a beacon from the packet's
//! destination. The receiver acknowledges with an ACK/RTR beacon that also
//! invites the next transmission. Broadcast data is delivered as one unicast
//! per neighbor that beacons during the send window.

macro_rules! ricer_log {
    ($level:ident, $mac:expr, $($arg:tt)+) => {
        log::$level!(
            "[node {}] *{}* {}",
            $mac.config.self_node_id,
            $mac.state.name(),
            format_args!($($arg)+)
        )
    };
}

mod config;
mod initiate_receive;
mod listen;
mod send;
mod sleep;
mod wait_to_send;

use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wsn_core::{Destination, NodeId};

pub use config::RicerConfig;

use crate::host::{Admission, MacHost, MacProtocol, SendOutcome};
use crate::{BinaryExponentialBackoff, MacError, MacFrame, Result, TransmitBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacTimer {
    WaitForRadioRxTransition,
    WaitForSleepTransition,
    BackoffForCca,
    WaitForTxComplete,
    ListenForData,
    WakeForReceive,
    SendTimeout,
    SendBackoff,
    WaitForAck,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RicerState {
    Sleep { started_at: Option<Duration> },
    InitiateReceive,
    ListenForData,
    WaitToSend { started_at: Duration },
    Send,
}

impl RicerState {
    fn name(&self) -> &'static str {
        match self {
            RicerState::Sleep { .. } => "Sleep",
            RicerState::InitiateReceive => "InitiateReceive",
            RicerState::ListenForData => "ListenForData",
            RicerState::WaitToSend { .. } => "WaitToSend",
            RicerState::Send => "Send",
        }
    }
}

pub struct RicerMac {
    config: RicerConfig,
    state: RicerState,
    buffer: TransmitBuffer,
    backoff: BinaryExponentialBackoff,
    rng: StdRng,
    /// Node whose beacon we are answering.
    target: Option<NodeId>,
    /// WakeForReceive fired while we were busy sending.
    need_rtr: bool,
    need_wake_for_receive: bool,
    need_wake_to_send: bool,
}

impl RicerMac {
    pub fn new(config: RicerConfig, seed: u64) -> Result<Self> {
        let backoff = BinaryExponentialBackoff::new(config.beb_slot_duration, config.beb_max_exponent)?;
        Ok(Self {
            buffer: TransmitBuffer::new(config.mac_buffer_size),
            backoff,
            rng: StdRng::seed_from_u64(seed),
            state: RicerState::InitiateReceive,
            target: None,
            need_rtr: false,
            need_wake_for_receive: false,
            need_wake_to_send: false,
            config,
        })
    }

    pub fn config(&self) -> &RicerConfig {
        &self.config
    }

    pub fn buffer(&self) -> &TransmitBuffer {
        &self.buffer
    }

    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    pub fn needs_rtr(&self) -> bool {
        self.need_rtr
    }

    fn id(&self) -> NodeId {
        self.config.self_node_id
    }

    fn change_state<H: MacHost<MacTimer>>(&mut self, host: &mut H, next: RicerState) -> Result<()> {
        ricer_log!(debug, self, "Changing to state {}", next.name());
        self.state = next;
        match next {
            RicerState::Sleep { .. } => self.enter_sleep(host),
            RicerState::InitiateReceive => self.enter_initiate_receive(host),
            RicerState::ListenForData => self.enter_listen_for_data(host),
            RicerState::WaitToSend { .. } => self.enter_wait_to_send(host),
            RicerState::Send => self.enter_send(host),
        }
    }

    fn go_to_sleep<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        self.change_state(host, RicerState::Sleep { started_at: None })
    }

    fn go_to_wait_to_send<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        let started_at = host.now();
        self.change_state(host, RicerState::WaitToSend { started_at })
    }

    fn violation(&self, detail: impl Into<String>) -> MacError {
        MacError::ProtocolViolation {
            state: self.state.name(),
            detail: detail.into(),
        }
    }

    fn unexpected_timer(&self, timer: MacTimer) -> MacError {
        MacError::UnexpectedTimer {
            state: self.state.name(),
            timer: format!("{:?}", timer),
        }
    }

    /// Data addressed elsewhere: pass up, never ACK.
    fn deliver_overheard<H: MacHost<MacTimer>>(&mut self, host: &mut H, frame: MacFrame) {
        ricer_log!(debug, self, "Overheard packet not addressed to us - passing to net layer");
        host.count("Ricer overheard packet");
        host.deliver(frame);
    }

    fn ignore_beacon<H: MacHost<MacTimer>>(&mut self, host: &mut H, frame: &MacFrame) {
        ricer_log!(warn, self, "Ignoring {} beacon from {}", frame.kind, frame.source);
        host.count_labelled("Ricer received packet breakdown", &format!("{} (ignored)", frame.kind));
    }

    fn send_rtr_beacon<H: MacHost<MacTimer>>(&mut self, host: &mut H) {
        ricer_log!(debug, self, "Sending RTR beacon");
        host.count_labelled("Ricer send packet breakdown", "RTR");
        host.transmit(MacFrame::rtr_beacon(self.id(), self.config.total_beacon_frame_bits()));
    }

    fn send_ack_rtr_beacon<H: MacHost<MacTimer>>(&mut self, host: &mut H, ack_for: NodeId) {
        ricer_log!(debug, self, "Sending ACK/RTR beacon in response to {}", ack_for);
        host.count_labelled("Ricer send packet breakdown", "ACK/RTR");
        host.transmit(MacFrame::ack_rtr_beacon(self.id(), ack_for, self.config.total_ack_frame_bits()));
    }

    fn send_data<H: MacHost<MacTimer>>(&mut self, host: &mut H, frame: MacFrame) {
        let label = if frame.is_data_for_broadcast {
            "data broadcast (as unicast)"
        } else {
            "data unicast"
        };
        ricer_log!(debug, self, "Sending data to node {}", frame.destination);
        host.count_labelled("Ricer send packet breakdown", label);
        host.transmit(frame);
    }

    /// Evicts packets past their attempt budget and reports each dropped unicast.
    fn drop_expired_packets<H: MacHost<MacTimer>>(&mut self, host: &mut H) {
        for node in self.buffer.drop_over_attempt_limit(self.config.max_send_retries) {
            ricer_log!(
                debug,
                self,
                "Dropped unicast packet to {} after {} send attempts",
                node,
                self.config.max_send_retries
            );
            host.count("Ricer dropped packet");
            host.report_send_result(node, SendOutcome::Failed);
        }
    }

    fn random_fraction(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

impl MacProtocol for RicerMac {
    type Timer = MacTimer;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn state_name(&self) -> &'static str {
        self.state.name()
    }

    fn startup<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        self.change_state(host, RicerState::InitiateReceive)
    }

    fn submit<H: MacHost<MacTimer>>(
        &mut self,
        host: &mut H,
        payload: Bytes,
        destination: Destination,
    ) -> Result<Admission> {
        let frame = MacFrame::data(self.id(), destination, payload, self.config.total_data_frame_bits());
        if let Err(full) = self.buffer.enqueue(frame) {
            ricer_log!(warn, self, "MAC buffer full, dropping packet for {}", full.frame.destination);
            host.count("Ricer buffer overflow");
            return Ok(Admission::Overflow);
        }
        ricer_log!(
            debug,
            self,
            "Packet buffered for {}, buffer size {}",
            destination,
            self.buffer.len()
        );
        // Awake states pick the packet up on their next pass through WaitToSend
        if matches!(self.state, RicerState::Sleep { .. }) {
            self.sleep_packet_buffered(host)?;
        }
        Ok(Admission::Queued)
    }

    fn on_frame<H: MacHost<MacTimer>>(&mut self, host: &mut H, frame: MacFrame) -> Result<()> {
        match self.state {
            RicerState::Sleep { .. } => self.sleep_on_frame(host, frame),
            RicerState::InitiateReceive => self.initiate_receive_on_frame(host, frame),
            RicerState::ListenForData => self.listen_on_frame(host, frame),
            RicerState::WaitToSend { .. } => self.wait_to_send_on_frame(host, frame),
            RicerState::Send => self.send_on_frame(host, frame),
        }
    }

    fn on_timer<H: MacHost<MacTimer>>(&mut self, host: &mut H, timer: MacTimer) -> Result<()> {
        match self.state {
            RicerState::Sleep { .. } => self.sleep_on_timer(host, timer),
            RicerState::InitiateReceive => self.initiate_receive_on_timer(host, timer),
            RicerState::ListenForData => self.listen_on_timer(host, timer),
            RicerState::WaitToSend { .. } => self.wait_to_send_on_timer(host, timer),
            RicerState::Send => self.send_on_timer(host, timer),
        }
    }

    fn reset_epoch<H: MacHost<MacTimer>>(&mut self, host: &mut H) {
        ricer_log!(info, self, "Out of energy, clearing {} buffered packets", self.buffer.len());
        self.buffer.clear();
        self.backoff.reset();
        self.state = RicerState::InitiateReceive;
        self.target = None;
        self.need_rtr = false;
        self.need_wake_for_receive = false;
        self.need_wake_to_send = false;
        host.cancel_all_timers();
    }

    fn finish<H: MacHost<MacTimer>>(&mut self, host: &mut H) {
        host.record("Ricer packets left in buffer: Unicast", self.buffer.unicast_count() as f64);
        host.record("Ricer packets left in buffer: Broadcast", self.buffer.broadcast_count() as f64);
        self.buffer.clear();
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests;
