//! message trains: each queued frame is repeated until it is ACKed or has
//! covered a whole receiver sleep period

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wsn_core::{CcaResult, NodeId, RadioState};

use super::{BoxMacConfig, BoxMacTimer, Signal};
use crate::host::{Admission, MacHost};
use crate::{MacError, MacFrame, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Idle,
    StartNextTrain,
    StartNextMessageInTrain,
    BackingOffInitial,
    BackingOffCongestion,
    BackingOffComplete,
    WaitingForRxTransition,
    Transmitting,
}

#[derive(Debug)]
pub(super) struct Sender {
    node: NodeId,
    queue: VecDeque<MacFrame>,
    state: SendState,
    okay_to_send: bool,
    wake_interval_expired: bool,
    sent_in_train: u32,
    train_started_at: Option<Duration>,
    rng: StdRng,
}

impl Sender {
    pub(super) fn new(node: NodeId, seed: u64) -> Self {
        Self {
            node,
            queue: VecDeque::new(),
            state: SendState::Idle,
            okay_to_send: false,
            wake_interval_expired: false,
            sent_in_train: 0,
            train_started_at: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub(super) fn queued(&self) -> usize {
        self.queue.len()
    }

    pub(super) fn enqueue<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        config: &BoxMacConfig,
        frame: MacFrame,
        signals: &mut VecDeque<Signal>,
    ) -> Result<Admission> {
        let admission = if self.queue.len() >= config.max_message_buffer_size {
            log::warn!("[node {}] <Sender> Send buffer full, discarding packet for {}", self.node, frame.destination);
            host.count("BoxMac buffer overflow");
            Admission::Overflow
        } else {
            self.queue.push_back(frame);
            log::trace!("[node {}] <Sender> Queued, queue size now {}", self.node, self.queue.len());
            Admission::Queued
        };

        if self.okay_to_send && self.state == SendState::Idle {
            self.start_next_train(host, config, signals)?;
        }
        Ok(admission)
    }

    pub(super) fn okay_to_send<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        config: &BoxMacConfig,
        signals: &mut VecDeque<Signal>,
    ) -> Result<()> {
        self.okay_to_send = true;
        self.start_next_train(host, config, signals)
    }

    /// A transmission already on air is allowed to finish.
    pub(super) fn do_not_send<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) {
        self.okay_to_send = false;
        if self.state == SendState::Transmitting {
            log::trace!("[node {}] <Sender> In the middle of a transmission, letting it finish", self.node);
            return;
        }
        host.stop_timer(BoxMacTimer::SenderLplWakeInterval);
        host.stop_timer(BoxMacTimer::SenderInterTransmission);
        host.stop_timer(BoxMacTimer::SenderBackoff);
        host.stop_timer(BoxMacTimer::SenderRxTransition);
        self.state = SendState::Idle;
    }

    /// Returns true when the ACK ended the current train.
    pub(super) fn on_ack<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        config: &BoxMacConfig,
        from: NodeId,
        signals: &mut VecDeque<Signal>,
    ) -> Result<bool> {
        if self.state != SendState::Transmitting {
            log::warn!("[node {}] <Sender> ACK from {} while not transmitting, ignoring", self.node, from);
            return Ok(false);
        }
        let acked = self
            .queue
            .front()
            .is_some_and(|frame| frame.destination.is_node(from));
        if !acked {
            log::warn!("[node {}] <Sender> ACK from {} does not match the current train", self.node, from);
            return Ok(false);
        }

        log::debug!("[node {}] <Sender> Message ACKed by {}, ending train early", self.node, from);
        self.record_unicast_train(host)?;
        host.stop_timer(BoxMacTimer::SenderLplWakeInterval);
        host.stop_timer(BoxMacTimer::SenderInterTransmission);
        self.queue.pop_front();
        self.state = SendState::StartNextTrain;
        self.start_next_train(host, config, signals)?;
        Ok(true)
    }

    pub(super) fn on_timer<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        config: &BoxMacConfig,
        timer: BoxMacTimer,
        signals: &mut VecDeque<Signal>,
    ) -> Result<()> {
        match timer {
            BoxMacTimer::SenderInterTransmission => {
                self.state = SendState::StartNextMessageInTrain;
                self.advance(host, config, signals)
            }
            BoxMacTimer::SenderLplWakeInterval => {
                // An ACK may still be on its way; checked after the current ACK wait
                log::trace!("[node {}] <Sender> Train period expired", self.node);
                self.wake_interval_expired = true;
                Ok(())
            }
            BoxMacTimer::SenderBackoff | BoxMacTimer::SenderRxTransition => {
                self.state = SendState::BackingOffComplete;
                self.advance(host, config, signals)
            }
            other => Err(MacError::UnexpectedTimer {
                state: "Sender",
                timer: format!("{:?}", other),
            }),
        }
    }

    pub(super) fn reset(&mut self) {
        self.queue.clear();
        self.state = SendState::Idle;
        self.okay_to_send = false;
        self.wake_interval_expired = false;
        self.sent_in_train = 0;
        self.train_started_at = None;
    }

    pub(super) fn clear(&mut self) -> usize {
        let left = self.queue.len();
        self.queue.clear();
        left
    }

    fn start_next_train<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        config: &BoxMacConfig,
        signals: &mut VecDeque<Signal>,
    ) -> Result<()> {
        if self.begin_train(host, signals) {
            self.advance(host, config, signals)
        } else {
            Ok(())
        }
    }

    /// Returns false, after signalling the controller, when the queue is empty.
    fn begin_train<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H, signals: &mut VecDeque<Signal>) -> bool {
        // Backoff and CCA need the radio listening
        host.set_radio_state(RadioState::Rx);
        if self.queue.is_empty() {
            log::trace!("[node {}] <Sender> Send queue empty", self.node);
            self.finished_sending(signals);
            return false;
        }
        signals.push_back(Signal::SenderIsSending);
        self.state = SendState::StartNextTrain;
        true
    }

    fn advance<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        config: &BoxMacConfig,
        signals: &mut VecDeque<Signal>,
    ) -> Result<()> {
        loop {
            let Some(front) = self.queue.front() else {
                log::warn!("[node {}] <Sender> Asked to advance with an empty queue, going idle", self.node);
                self.finished_sending(signals);
                return Ok(());
            };
            if !self.okay_to_send {
                log::debug!("[node {}] <Sender> Not okay to send, going idle", self.node);
                self.finished_sending(signals);
                return Ok(());
            }
            let is_broadcast = front.destination.is_broadcast();

            match self.state {
                SendState::StartNextTrain => {
                    self.sent_in_train = 0;
                    self.train_started_at = Some(host.now());
                    if is_broadcast {
                        host.count("BoxMac Sent broadcast");
                    } else {
                        host.count("BoxMac Sent unicast");
                    }
                    self.wake_interval_expired = false;
                    host.stop_timer(BoxMacTimer::SenderLplWakeInterval);
                    host.start_timer(BoxMacTimer::SenderLplWakeInterval, config.train_duration())?;
                    self.state = SendState::StartNextMessageInTrain;
                }
                SendState::StartNextMessageInTrain if !self.wake_interval_expired => {
                    host.count("BoxMac Backoff initial");
                    let backoff = config.initial_backoff(self.rng.random::<f64>());
                    host.start_timer(BoxMacTimer::SenderBackoff, backoff)?;
                    self.state = SendState::BackingOffInitial;
                    return Ok(());
                }
                SendState::StartNextMessageInTrain => {
                    if is_broadcast {
                        log::debug!("[node {}] <Sender> Finished broadcasting message", self.node);
                    } else {
                        let destination = front.destination;
                        log::debug!(
                            "[node {}] <Sender> Train to {} covered a whole wake interval without an ACK",
                            self.node,
                            destination
                        );
                        host.count("BoxMac Msg not acked");
                        if let Some(node) = destination.node() {
                            signals.push_back(Signal::SendFailedNoAck(node));
                        }
                        self.record_unicast_train(host)?;
                    }
                    self.queue.pop_front();
                    if !self.begin_train(host, signals) {
                        return Ok(());
                    }
                }
                SendState::BackingOffComplete => {
                    self.sample_and_transmit(host, config)?;
                    return Ok(());
                }
                other => {
                    return Err(MacError::ProtocolViolation {
                        state: "Sender",
                        detail: format!("advancing send state from {:?}", other),
                    })
                }
            }
        }
    }

    fn sample_and_transmit<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H, config: &BoxMacConfig) -> Result<()> {
        match host.sample_cca() {
            CcaResult::Clear => {
                let Some(frame) = self.queue.front().cloned() else {
                    return Ok(());
                };
                log::trace!(
                    "[node {}] <Sender> CCA clear, transmitting seq {} to {}",
                    self.node,
                    frame.sequence_number,
                    frame.destination
                );
                let wait = if frame.destination.is_broadcast() {
                    config.inter_transmission_broadcast_delay
                } else {
                    config.inter_transmission_ack_receive_delay
                };
                host.transmit(frame);
                self.sent_in_train += 1;
                host.start_timer(BoxMacTimer::SenderInterTransmission, wait)?;
                self.state = SendState::Transmitting;
            }
            CcaResult::Busy => {
                log::trace!("[node {}] <Sender> CCA busy, congestion backoff", self.node);
                host.count("BoxMac Backoff congestion");
                let backoff = config.congestion_backoff(self.rng.random::<f64>());
                host.start_timer(BoxMacTimer::SenderBackoff, backoff)?;
                self.state = SendState::BackingOffCongestion;
            }
            result @ (CcaResult::NotValid | CcaResult::NotValidYet) => {
                log::warn!(
                    "[node {}] <Sender> CCA {:?}, waiting for the radio to settle in RX",
                    self.node,
                    result
                );
                host.start_timer(BoxMacTimer::SenderRxTransition, config.wait_for_rx_transition)?;
                self.state = SendState::WaitingForRxTransition;
            }
        }
        Ok(())
    }

    fn record_unicast_train<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) -> Result<()> {
        let is_unicast = self.queue.front().is_some_and(|frame| !frame.destination.is_broadcast());
        if !is_unicast {
            return Ok(());
        }
        let started_at = self.train_started_at.ok_or_else(|| MacError::ProtocolViolation {
            state: "Sender",
            detail: "train start time was not recorded".to_string(),
        })?;
        let duration = host.now().saturating_sub(started_at);
        host.record("BoxMac Messages in unicast train", self.sent_in_train as f64);
        host.record("BoxMac Message train duration", duration.as_secs_f64());
        Ok(())
    }

    fn finished_sending(&mut self, signals: &mut VecDeque<Signal>) {
        log::trace!("[node {}] <Sender> Finished sending, going idle", self.node);
        signals.push_back(Signal::SenderFinished);
        self.state = SendState::Idle;
    }
}
