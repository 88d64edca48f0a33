use std::time::Duration;

use wsn_core::{CcaResult, Destination, NodeId};

use super::{MacTimer, RicerMac, RicerState};
use crate::host::{MacHost, SendOutcome};
use crate::{FrameKind, MacFrame, Result};

impl RicerMac {
    pub(super) fn enter_send<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        if self.target.is_none() {
            return Err(self.violation("entered Send without a node to send to"));
        }

        let min = self.config.send_data_backoff_min;
        let range = self.config.send_data_backoff_max.saturating_sub(min);
        let backoff = min + range.mul_f64(self.random_fraction());
        ricer_log!(debug, self, "Backing off {:?} before sending", backoff);
        host.start_timer(MacTimer::SendBackoff, backoff)?;
        Ok(())
    }

    pub(super) fn send_on_frame<H: MacHost<MacTimer>>(&mut self, host: &mut H, frame: MacFrame) -> Result<()> {
        match frame.kind {
            FrameKind::Data if frame.destination.is_broadcast() => {
                Err(self.violation("data frame sent to BROADCAST"))
            }
            FrameKind::Data if frame.is_for(self.id()) => Err(self.violation(format!(
                "data from {} addressed to this node while sending",
                frame.source
            ))),
            FrameKind::Data => {
                self.deliver_overheard(host, frame);
                Ok(())
            }
            FrameKind::AckRtrBeacon if frame.ack_for == Some(self.id()) => self.received_ack(host, frame.source),
            FrameKind::AckRtrBeacon | FrameKind::RtrBeacon => {
                // Already backing off or waiting for an ACK
                self.ignore_beacon(host, &frame);
                Ok(())
            }
            FrameKind::Ack => Err(self.violation("BoxMac ACK frame received by RICER")),
        }
    }

    pub(super) fn send_on_timer<H: MacHost<MacTimer>>(&mut self, host: &mut H, timer: MacTimer) -> Result<()> {
        match timer {
            MacTimer::SendBackoff => self.send_backoff_ended(host),
            MacTimer::WaitForAck => {
                ricer_log!(debug, self, "No ACK received, returning to wait to send");
                host.count("Ricer packet not ACKed");
                self.finish_send(host)
            }
            MacTimer::WakeForReceive => {
                ricer_log!(debug, self, "Wake for receive fired, will send RTR before sleeping");
                self.need_rtr = true;
                Ok(())
            }
            MacTimer::SendTimeout => {
                if host.is_timer_running(MacTimer::WaitForAck) {
                    let ack_left = host.timer_remaining(MacTimer::WaitForAck)?;
                    ricer_log!(warn, self, "Send timeout while waiting for an ACK, extending by {:?}", ack_left);
                    host.start_timer(MacTimer::SendTimeout, ack_left + Duration::from_nanos(1))?;
                    Ok(())
                } else if host.is_timer_running(MacTimer::SendBackoff) {
                    ricer_log!(warn, self, "Send timeout during send backoff, aborting send");
                    host.stop_timer(MacTimer::SendBackoff);
                    self.drop_expired_packets(host);
                    self.target = None;
                    self.go_to_sleep(host)
                } else {
                    Err(self.violation("send timeout while neither backing off nor waiting for an ACK"))
                }
            }
            other => Err(self.unexpected_timer(other)),
        }
    }

    fn send_backoff_ended<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        let target = self.current_target()?;
        match host.sample_cca() {
            CcaResult::Clear => {
                host.count("Ricer CCA clear for data");
                let mut frame = self
                    .buffer
                    .next_for(target)
                    .map(|packet| packet.frame.clone())
                    .ok_or_else(|| self.violation(format!("ready to send to {} but no packet is waiting", target)))?;
                if frame.is_data_for_broadcast {
                    ricer_log!(debug, self, "Sending broadcast as a unicast to {}", target);
                    frame.destination = Destination::Node(target);
                }
                self.send_data(host, frame);
                host.start_timer(MacTimer::WaitForAck, self.config.wait_for_ack_time())?;
                Ok(())
            }
            CcaResult::Busy => {
                // Another sender won this beacon; its ACK will serve as our next one
                ricer_log!(debug, self, "CCA busy, returning to wait to send");
                host.count("Ricer CCA busy for data");
                self.finish_send(host)
            }
            result @ (CcaResult::NotValid | CcaResult::NotValidYet) => {
                Err(self.violation(format!("CCA {:?} after send backoff", result)))
            }
        }
    }

    fn received_ack<H: MacHost<MacTimer>>(&mut self, host: &mut H, from: NodeId) -> Result<()> {
        if !host.is_timer_running(MacTimer::WaitForAck) {
            return Err(self.violation(format!("ACK from {} while not waiting for one", from)));
        }
        let target = self.current_target()?;

        ricer_log!(debug, self, "Received ACK from {}", target);
        host.count_labelled("Ricer received packet breakdown", "ACK/RTR");
        host.count("Ricer packet ACKed");
        host.stop_timer(MacTimer::WaitForAck);

        let was_broadcast = self
            .buffer
            .next_for(target)
            .map(|packet| packet.frame.is_data_for_broadcast)
            .ok_or_else(|| self.violation(format!("ACK from {} for a packet no longer buffered", target)))?;
        if was_broadcast {
            self.buffer.mark_sent_broadcast(target)?;
        } else {
            host.report_send_result(target, SendOutcome::Acked);
            self.buffer.remove_unicast(target)?;
        }

        // The ACK doubles as the next ready-to-receive beacon
        if self.buffer.has_packet_for(target) {
            ricer_log!(debug, self, "Another packet for {}, sending again", target);
            self.change_state(host, RicerState::Send)
        } else {
            self.finish_send(host)
        }
    }

    fn finish_send<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        self.target = None;
        self.go_to_wait_to_send(host)
    }

    fn current_target(&self) -> Result<NodeId> {
        self.target
            .ok_or_else(|| self.violation("no node to send to"))
    }
}
