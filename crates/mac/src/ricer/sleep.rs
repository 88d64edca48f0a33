use wsn_core::RadioState;

use super::{MacTimer, RicerMac, RicerState};
use crate::host::MacHost;
use crate::{FrameKind, MacFrame, Result};

impl RicerMac {
    pub(super) fn enter_sleep<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        if self.need_rtr {
            ricer_log!(debug, self, "Need to send RTR beacon so not sleeping");
            self.need_rtr = false;
            return self.change_state(host, RicerState::InitiateReceive);
        }

        ricer_log!(debug, self, "Setting radio to SLEEP, waiting for transition before allowing wakeup");
        host.set_radio_state(RadioState::Sleep);
        host.start_timer(MacTimer::WaitForSleepTransition, self.config.wait_for_sleep_transition)?;
        self.state = RicerState::Sleep {
            started_at: Some(host.now()),
        };
        Ok(())
    }

    /// Only possible while the radio is still settling into sleep.
    pub(super) fn sleep_on_frame<H: MacHost<MacTimer>>(&mut self, host: &mut H, frame: MacFrame) -> Result<()> {
        ricer_log!(warn, self, "Received {} from {} while transitioning to sleep", frame.kind, frame.source);

        if frame.is_for(self.id()) {
            return Err(self.violation(format!(
                "{} from {} addressed to this node while asleep",
                frame.kind, frame.source
            )));
        }

        match frame.kind {
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

    pub(super) fn sleep_packet_buffered<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        // Switching to RX mid-transition would fail silently, so wait it out
        if host.is_timer_running(MacTimer::WaitForSleepTransition) {
            ricer_log!(debug, self, "Packet buffered while radio is still transitioning to SLEEP");
            self.need_wake_to_send = true;
            return Ok(());
        }

        ricer_log!(debug, self, "Packet buffered, waking up to send");
        self.record_sleep_time(host)?;
        self.go_to_wait_to_send(host)
    }

    pub(super) fn sleep_on_timer<H: MacHost<MacTimer>>(&mut self, host: &mut H, timer: MacTimer) -> Result<()> {
        match timer {
            MacTimer::WaitForSleepTransition => {
                if self.need_wake_for_receive {
                    ricer_log!(debug, self, "Transition complete, can now wake for receive");
                    self.need_wake_for_receive = false;
                    self.record_sleep_time(host)?;
                    self.change_state(host, RicerState::InitiateReceive)
                } else if self.need_wake_to_send {
                    ricer_log!(debug, self, "Transition complete, can now send packet buffered during sleep");
                    self.need_wake_to_send = false;
                    self.record_sleep_time(host)?;
                    self.go_to_wait_to_send(host)
                } else {
                    Ok(())
                }
            }
            MacTimer::WakeForReceive => {
                if host.is_timer_running(MacTimer::WaitForSleepTransition) {
                    ricer_log!(warn, self, "Wake for receive fired while radio is still transitioning to SLEEP");
                    self.need_wake_for_receive = true;
                    return Ok(());
                }
                ricer_log!(debug, self, "Wake for receive expired, going to initiate receive");
                host.count("Ricer wakeup");
                self.record_sleep_time(host)?;
                self.change_state(host, RicerState::InitiateReceive)
            }
            other => Err(self.unexpected_timer(other)),
        }
    }

    fn record_sleep_time<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        let started_at = match self.state {
            RicerState::Sleep { started_at: Some(at) } => at,
            _ => return Err(self.violation("sleep start time was not recorded on entering sleep")),
        };
        let slept = host.now().saturating_sub(started_at);
        host.record("Ricer sleep time", slept.as_secs_f64());
        self.state = RicerState::Sleep { started_at: None };
        Ok(())
    }
}
