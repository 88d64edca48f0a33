//! BoxMac: sender-initiated low power listening
//!
//! Receivers sleep for `sleep_time`, wake, and poll CCA a number of times.
//! A sender repeats each frame (a message train) for longer than a full
//! sleep period so that every neighbor wakes during the train. Unicast trains
//! stop early on an ACK. The MAC is split into a controller, which owns the
//! duty cycle, a CCA poller and a sender. The two helpers talk back to the
//! controller through queued [`Signal`]s.

macro_rules! boxmac_log {
    ($level:ident, $mac:expr, $($arg:tt)+) => {
        log::$level!(
            "[node {}] *{}* {}",
            $mac.config.self_node_id,
            $mac.state.name(),
            format_args!($($arg)+)
        )
    };
}

mod cca;
mod config;
mod controller;
mod sender;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use wsn_core::{Destination, NodeId};

pub use config::BoxMacConfig;

use self::cca::CcaPoller;
use self::sender::Sender;
use crate::host::{Admission, MacHost, MacProtocol};
use crate::{MacFrame, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxMacTimer {
    LplSleep,
    ListenPeriod,
    CcaRxTransition,
    CcaPollDelay,
    SenderLplWakeInterval,
    SenderInterTransmission,
    SenderBackoff,
    SenderRxTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    CcaBusy,
    CcaClear,
    SenderIsSending,
    SenderFinished,
    SendFailedNoAck(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoxMacState {
    Startup,
    PollingCca,
    Listening,
    WaitingForSender,
    Sleeping,
    WaitingForSenderFromSleep,
}

impl BoxMacState {
    fn name(&self) -> &'static str {
        match self {
            BoxMacState::Startup => "Startup",
            BoxMacState::PollingCca => "PollingCca",
            BoxMacState::Listening => "Listening",
            BoxMacState::WaitingForSender => "WaitingForSender",
            BoxMacState::Sleeping => "Sleeping",
            BoxMacState::WaitingForSenderFromSleep => "WaitingForSenderFromSleep",
        }
    }
}

pub struct BoxMac {
    config: BoxMacConfig,
    state: BoxMacState,
    cca: CcaPoller,
    sender: Sender,
    signals: VecDeque<Signal>,
    /// Shared by data and ACK frames. Survives energy loss so neighbors
    /// never discard our first frames after a restart as duplicates.
    sequence_number: u32,
    last_sequence: HashMap<NodeId, u32>,
    sleep_started_at: Option<Duration>,
    /// No frame addressed to us since the listen period began.
    idle_listen: bool,
}

impl BoxMac {
    pub fn new(config: BoxMacConfig, seed: u64) -> Self {
        let node = config.self_node_id;
        Self {
            cca: CcaPoller::new(node),
            sender: Sender::new(node, seed),
            state: BoxMacState::Startup,
            signals: VecDeque::new(),
            sequence_number: 0,
            last_sequence: HashMap::new(),
            sleep_started_at: None,
            idle_listen: true,
            config,
        }
    }

    pub fn config(&self) -> &BoxMacConfig {
        &self.config
    }

    fn id(&self) -> NodeId {
        self.config.self_node_id
    }

    fn next_sequence_number(&mut self) -> u32 {
        let sequence_number = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        sequence_number
    }

    /// True the first time a (source, sequence number) pair is seen in a row.
    fn is_new_frame(&mut self, frame: &MacFrame) -> bool {
        let previous = self.last_sequence.insert(frame.source, frame.sequence_number);
        previous != Some(frame.sequence_number)
    }

    fn process_signals<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) -> Result<()> {
        while let Some(signal) = self.signals.pop_front() {
            self.on_signal(host, signal)?;
        }
        Ok(())
    }
}

impl MacProtocol for BoxMac {
    type Timer = BoxMacTimer;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn state_name(&self) -> &'static str {
        self.state.name()
    }

    fn startup<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) -> Result<()> {
        self.state = BoxMacState::Startup;
        self.idle_listen = true;
        self.sleep_started_at = None;
        self.start_cca_polling(host)?;
        self.process_signals(host)
    }

    fn submit<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        payload: Bytes,
        destination: Destination,
    ) -> Result<Admission> {
        let mut frame = MacFrame::data(self.id(), destination, payload, self.config.data_frame_bits);
        frame.sequence_number = self.next_sequence_number();
        boxmac_log!(trace, self, "Data for {} handed to sender, seq {}", destination, frame.sequence_number);
        let admission = self.sender.enqueue(host, &self.config, frame, &mut self.signals)?;
        self.process_signals(host)?;
        Ok(admission)
    }

    fn on_frame<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H, frame: MacFrame) -> Result<()> {
        self.controller_on_frame(host, frame)?;
        self.process_signals(host)
    }

    fn on_timer<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H, timer: BoxMacTimer) -> Result<()> {
        match timer {
            BoxMacTimer::LplSleep | BoxMacTimer::ListenPeriod => self.controller_on_timer(host, timer)?,
            BoxMacTimer::CcaRxTransition | BoxMacTimer::CcaPollDelay => {
                self.cca.poll(host, &self.config, &mut self.signals)?
            }
            BoxMacTimer::SenderLplWakeInterval
            | BoxMacTimer::SenderInterTransmission
            | BoxMacTimer::SenderBackoff
            | BoxMacTimer::SenderRxTransition => self.sender.on_timer(host, &self.config, timer, &mut self.signals)?,
        }
        self.process_signals(host)
    }

    fn reset_epoch<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) {
        boxmac_log!(info, self, "Out of energy, clearing {} queued packets", self.sender.queued());
        host.cancel_all_timers();
        self.state = BoxMacState::Startup;
        self.signals.clear();
        self.sleep_started_at = None;
        self.idle_listen = true;
        self.cca.reset();
        self.sender.reset();
    }

    fn finish<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) {
        let left = self.sender.clear();
        host.record("BoxMac packets left in buffer", left as f64);
    }

    fn buffered(&self) -> usize {
        self.sender.queued()
    }
}

#[cfg(test)]
mod tests;
