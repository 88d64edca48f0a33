use wsn_core::{Destination, NodeId, RadioState};

use super::{BoxMac, BoxMacState, BoxMacTimer, Signal};
use crate::host::{MacHost, SendOutcome};
use crate::{FrameKind, MacError, MacFrame, Result};

impl BoxMac {
    pub(super) fn change_state(&mut self, next: BoxMacState) -> Result<()> {
        use BoxMacState::*;

        let legal = match next {
            Startup => true,
            PollingCca => matches!(self.state, Startup | Sleeping),
            Listening => matches!(self.state, PollingCca),
            WaitingForSender => matches!(self.state, PollingCca | Listening),
            Sleeping => matches!(self.state, WaitingForSender | WaitingForSenderFromSleep),
            WaitingForSenderFromSleep => matches!(self.state, Sleeping),
        };
        if !legal {
            return Err(MacError::IllegalTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        boxmac_log!(trace, self, "Changing to state {}", next.name());
        self.state = next;
        Ok(())
    }

    pub(super) fn start_cca_polling<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) -> Result<()> {
        self.change_state(BoxMacState::PollingCca)?;
        self.cca.start(host, &self.config)
    }

    fn signal_okay_to_send<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) -> Result<()> {
        self.change_state(BoxMacState::WaitingForSender)?;
        self.sender.okay_to_send(host, &self.config, &mut self.signals)
    }

    pub(super) fn on_signal<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H, signal: Signal) -> Result<()> {
        match signal {
            Signal::CcaBusy => {
                boxmac_log!(debug, self, "Channel busy, listening for frames");
                self.change_state(BoxMacState::Listening)?;
                host.start_timer(BoxMacTimer::ListenPeriod, self.config.receive_period_after_cca_busy)?;
                self.idle_listen = true;
                Ok(())
            }
            Signal::CcaClear => {
                boxmac_log!(trace, self, "Channel clear, sender may send");
                self.signal_okay_to_send(host)
            }
            Signal::SenderIsSending => {
                if self.state != BoxMacState::Sleeping {
                    return Ok(());
                }
                boxmac_log!(debug, self, "Sender woke us, pausing sleep timer");
                self.record_sleep_duration(host)?;
                host.pause_timer(BoxMacTimer::LplSleep)?;
                self.change_state(BoxMacState::WaitingForSenderFromSleep)
            }
            Signal::SenderFinished => {
                if self.state == BoxMacState::WaitingForSenderFromSleep {
                    if !host.is_timer_paused(BoxMacTimer::LplSleep) {
                        return Err(MacError::ProtocolViolation {
                            state: self.state.name(),
                            detail: "sleep timer is not paused".to_string(),
                        });
                    }
                    host.resume_timer(BoxMacTimer::LplSleep)?;
                } else {
                    boxmac_log!(debug, self, "Sleeping for {:?}", self.config.sleep_time);
                    host.start_timer(BoxMacTimer::LplSleep, self.config.sleep_time)?;
                }
                self.sleep_started_at = Some(host.now());
                self.change_state(BoxMacState::Sleeping)?;
                host.set_radio_state(RadioState::Sleep);
                Ok(())
            }
            Signal::SendFailedNoAck(neighbor) => {
                host.report_send_result(neighbor, SendOutcome::Failed);
                Ok(())
            }
        }
    }

    pub(super) fn controller_on_timer<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        timer: BoxMacTimer,
    ) -> Result<()> {
        match timer {
            BoxMacTimer::LplSleep => {
                boxmac_log!(trace, self, "Sleep period ended");
                self.record_sleep_duration(host)?;
                self.sender.do_not_send(host);
                self.start_cca_polling(host)
            }
            BoxMacTimer::ListenPeriod => {
                if self.idle_listen {
                    host.count("BoxMac Idle listening");
                }
                self.signal_okay_to_send(host)
            }
            other => Err(MacError::UnexpectedTimer {
                state: self.state.name(),
                timer: format!("{:?}", other),
            }),
        }
    }

    pub(super) fn controller_on_frame<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        frame: MacFrame,
    ) -> Result<()> {
        if self.state == BoxMacState::Sleeping {
            boxmac_log!(warn, self, "Ignoring {} from {} received while asleep", frame.kind, frame.source);
            return Ok(());
        }
        if frame.is_beacon() {
            return Err(MacError::ProtocolViolation {
                state: self.state.name(),
                detail: format!("RICER {} frame received by BoxMac", frame.kind),
            });
        }

        let destination = frame.destination;
        match destination {
            Destination::Broadcast => {
                if self.is_new_frame(&frame) {
                    host.count("BoxMac Received broadcast");
                    host.deliver(frame);
                } else {
                    boxmac_log!(trace, self, "Duplicate broadcast {} from {}", frame.sequence_number, frame.source);
                }
            }
            Destination::Node(node) if node != self.id() => match frame.kind {
                FrameKind::Data => {
                    if self.is_new_frame(&frame) {
                        host.count("BoxMac Overheard");
                        host.deliver(frame);
                    }
                }
                _ => boxmac_log!(trace, self, "Overheard ACK for node {}", node),
            },
            Destination::Node(_) => match frame.kind {
                FrameKind::Data => self.received_data(host, frame),
                _ => self.received_ack(host, frame.source)?,
            },
        }
        Ok(())
    }

    /// Every copy is ACKed, since a repeat means our previous ACK was lost.
    fn received_data<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H, frame: MacFrame) {
        boxmac_log!(debug, self, "Data from {} for us, sending ACK", frame.source);
        host.count("BoxMac Received data");
        self.idle_listen = false;

        host.count("BoxMac Sent ACK");
        let sequence_number = self.next_sequence_number();
        host.transmit(MacFrame::ack(
            self.id(),
            frame.source,
            sequence_number,
            self.config.ack_frame_bits,
        ));

        if self.is_new_frame(&frame) {
            host.deliver(frame);
        } else {
            boxmac_log!(trace, self, "Not passing up duplicate {} from {}", frame.sequence_number, frame.source);
        }
    }

    fn received_ack<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H, from: NodeId) -> Result<()> {
        boxmac_log!(debug, self, "ACK from {}", from);
        host.count("BoxMac Received ACK");
        if self.sender.on_ack(host, &self.config, from, &mut self.signals)? {
            host.report_send_result(from, SendOutcome::Acked);
        }
        Ok(())
    }

    fn record_sleep_duration<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H) -> Result<()> {
        let started_at = self.sleep_started_at.take().ok_or_else(|| MacError::ProtocolViolation {
            state: self.state.name(),
            detail: "sleep start time was not recorded".to_string(),
        })?;
        let slept = host.now().saturating_sub(started_at);
        host.record("BoxMac Total sleep duration", slept.as_secs_f64());
        Ok(())
    }
}
