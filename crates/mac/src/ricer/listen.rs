use std::time::Duration;

use super::{MacTimer, RicerMac};
use crate::host::MacHost;
use crate::{FrameKind, MacFrame, Result};

impl RicerMac {
    pub(super) fn enter_listen_for_data<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        // Entered straight after an RTR, so the radio is already in RX
        host.start_timer(MacTimer::ListenForData, self.config.listen_for_data_dwell())?;
        Ok(())
    }

    pub(super) fn listen_on_frame<H: MacHost<MacTimer>>(&mut self, host: &mut H, frame: MacFrame) -> Result<()> {
        match frame.kind {
            FrameKind::Data if frame.destination.is_broadcast() => {
                Err(self.violation("data frame sent to BROADCAST"))
            }
            FrameKind::Data if frame.is_for(self.id()) => {
                ricer_log!(debug, self, "Received data from {}, ACKing and listening again", frame.source);
                host.count("Ricer sent RTR and received data");
                host.count_labelled("Ricer received packet breakdown", "data");
                host.stop_timer(MacTimer::ListenForData);
                let source = frame.source;
                host.deliver(frame);
                self.send_ack_rtr_beacon(host, source);
                self.enter_listen_for_data(host)
            }
            FrameKind::Data => {
                self.deliver_overheard(host, frame);
                Ok(())
            }
            FrameKind::RtrBeacon | FrameKind::AckRtrBeacon => {
                self.ignore_beacon(host, &frame);
                Ok(())
            }
            FrameKind::Ack => Err(self.violation("BoxMac ACK frame received by RICER")),
        }
    }

    pub(super) fn listen_on_timer<H: MacHost<MacTimer>>(&mut self, host: &mut H, timer: MacTimer) -> Result<()> {
        match timer {
            MacTimer::ListenForData => {
                ricer_log!(debug, self, "Listen for data expired");
                host.count("Ricer sent RTR but no data");

                let interval = self.next_wake_interval();
                ricer_log!(debug, self, "Next wake for receive in {:?}", interval);
                host.start_timer(MacTimer::WakeForReceive, interval)?;
                self.go_to_wait_to_send(host)
            }
            other => Err(self.unexpected_timer(other)),
        }
    }

    /// `interval ± jitter`, drawn uniformly, to keep neighbours from beaconing in lockstep.
    fn next_wake_interval(&mut self) -> Duration {
        let jitter = self.config.wake_for_receive_jitter.as_secs_f64();
        let offset = self.random_fraction() * jitter * 2.0 - jitter;
        let interval = self.config.wake_for_receive_interval.as_secs_f64() + offset;
        Duration::from_secs_f64(interval.max(0.0))
    }
}
