use wsn_core::{CcaResult, RadioState};

use super::{MacTimer, RicerMac, RicerState};
use crate::host::MacHost;
use crate::{FrameKind, MacFrame, Result};

impl RicerMac {
    pub(super) fn enter_initiate_receive<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        ricer_log!(debug, self, "Requesting radio go to RX");
        self.backoff.reset();
        host.set_radio_state(RadioState::Rx);
        host.start_timer(MacTimer::WaitForRadioRxTransition, self.config.wait_for_rx_transition)?;
        Ok(())
    }

    pub(super) fn initiate_receive_on_frame<H: MacHost<MacTimer>>(
        &mut self,
        host: &mut H,
        frame: MacFrame,
    ) -> Result<()> {
        match frame.kind {
            FrameKind::Data if frame.destination.is_broadcast() => {
                Err(self.violation("data frame sent to BROADCAST"))
            }
            FrameKind::Data if frame.is_for(self.id()) => Err(self.violation(format!(
                "data from {} received before a ready-to-receive beacon was sent",
                frame.source
            ))),
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

    pub(super) fn initiate_receive_on_timer<H: MacHost<MacTimer>>(
        &mut self,
        host: &mut H,
        timer: MacTimer,
    ) -> Result<()> {
        match timer {
            MacTimer::WaitForRadioRxTransition | MacTimer::BackoffForCca | MacTimer::WaitForTxComplete => {
                ricer_log!(debug, self, "{:?} complete, checking CCA", timer);
                self.check_cca_for_rtr(host)
            }
            other => Err(self.unexpected_timer(other)),
        }
    }

    fn check_cca_for_rtr<H: MacHost<MacTimer>>(&mut self, host: &mut H) -> Result<()> {
        match host.sample_cca() {
            CcaResult::Clear => {
                ricer_log!(debug, self, "CCA clear, sending RTR beacon");
                host.count("Ricer CCA clear for RTR");
                self.send_rtr_beacon(host);
                self.backoff.reset();
                self.change_state(host, RicerState::ListenForData)
            }
            CcaResult::Busy => {
                host.count("Ricer CCA busy for RTR");
                let backoff = self.backoff.next_backoff(&mut self.rng);
                ricer_log!(debug, self, "CCA busy, backing off for {:?}", backoff);
                host.start_timer(MacTimer::BackoffForCca, backoff)?;
                Ok(())
            }
            result @ (CcaResult::NotValid | CcaResult::NotValidYet) => {
                // The radio can still be finishing a transmission started before the last sleep
                ricer_log!(warn, self, "CCA {:?}, waiting for radio TX to complete", result);
                host.start_timer(
                    MacTimer::WaitForTxComplete,
                    self.config.wait_for_tx_complete_after_invalid_cca,
                )?;
                Ok(())
            }
        }
    }
}
