use wsn_core::{NodeId, RadioState};

use super::{MacTimer, RicerMac, RicerState};
use crate::host::MacHost;
use crate::{FrameKind, MacFrame, Result};

impl RicerMac {
    pub(super) fn enter_wait_to_send<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        if self.buffer.is_empty() {
            ricer_log!(debug, self, "Nothing to send");
            return self.stop_sending_and_sleep(host);
        }

        // Still running when we come back here from Send
        if host.is_timer_running(MacTimer::SendTimeout) {
            ricer_log!(debug, self, "Returning after a send, send timeout still running");
            return Ok(());
        }

        // Counted at the start of the window, so packets buffered while
        // waiting get a full window of their own.
        self.buffer.increment_all_attempts();
        if self.buffer.is_empty() {
            return self.stop_sending_and_sleep(host);
        }

        ricer_log!(debug, self, "Starting send timeout, waiting for beacons");
        host.start_timer(MacTimer::SendTimeout, self.config.send_timeout())?;
        host.set_radio_state(RadioState::Rx);
        Ok(())
    }

    pub(super) fn wait_to_send_on_frame<H: MacHost<MacTimer>>(
        &mut self,
        host: &mut H,
        frame: MacFrame,
    ) -> Result<()> {
        match frame.kind {
            FrameKind::Data if frame.destination.is_broadcast() => {
                Err(self.violation("data frame sent to BROADCAST"))
            }
            FrameKind::Data if frame.is_for(self.id()) => {
                // Our RTR went out late behind an earlier transmission and the
                // sender answered after the listen window closed.
                ricer_log!(
                    warn,
                    self,
                    "Data from {} addressed to this node while waiting to send, ignoring",
                    frame.source
                );
                Ok(())
            }
            FrameKind::Data => {
                self.deliver_overheard(host, frame);
                Ok(())
            }
            FrameKind::AckRtrBeacon if frame.ack_for == Some(self.id()) => Err(self.violation(format!(
                "ACK from {} while not waiting for one",
                frame.source
            ))),
            FrameKind::AckRtrBeacon => {
                // An ACK to another node still invites the next transmission
                host.count_labelled("Ricer received packet breakdown", "ACK/RTR");
                self.received_beacon_from(host, frame.source)
            }
            FrameKind::RtrBeacon => {
                host.count_labelled("Ricer received packet breakdown", "RTR");
                self.received_beacon_from(host, frame.source)
            }
            FrameKind::Ack => Err(self.violation("BoxMac ACK frame received by RICER")),
        }
    }

    pub(super) fn wait_to_send_on_timer<H: MacHost<MacTimer>>(
        &mut self,
        host: &mut H,
        timer: MacTimer,
    ) -> Result<()> {
        match timer {
            MacTimer::WakeForReceive => {
                ricer_log!(debug, self, "Wake for receive fired, will send RTR before sleeping");
                self.need_rtr = true;
                Ok(())
            }
            MacTimer::SendTimeout => {
                ricer_log!(debug, self, "Send timeout, dropping packets over max send attempts");
                self.drop_expired_packets(host);
                self.stop_sending_and_sleep(host)
            }
            other => Err(self.unexpected_timer(other)),
        }
    }

    fn received_beacon_from<H: MacHost<MacTimer>>(&mut self, host: &mut H, node: NodeId) -> Result<()> {
        if !self.buffer.has_packet_for(node) {
            ricer_log!(debug, self, "Beacon from {} but nothing to send to it", node);
            return Ok(());
        }

        ricer_log!(debug, self, "Beacon from {} and have a packet for it", node);
        self.target = Some(node);
        self.record_wait_to_send_time(host);
        self.change_state(host, RicerState::Send)
    }

    fn stop_sending_and_sleep<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        host.stop_timer(MacTimer::SendTimeout);
        self.record_wait_to_send_time(host);
        self.go_to_sleep(host)
    }

    fn record_wait_to_send_time<H: MacHost<MacTimer>>(&mut self, host: &mut H) {
        if let RicerState::WaitToSend { started_at } = self.state {
            let waited = host.now().saturating_sub(started_at);
            host.record("Ricer wait to send time", waited.as_secs_f64());
        }
    }
}
