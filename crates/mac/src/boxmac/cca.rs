//! wake-up channel sampling: decides whether anyone is transmitting a train

use std::collections::VecDeque;

use wsn_core::{CcaResult, NodeId, RadioState};

use super::{BoxMacConfig, BoxMacTimer, Signal};
use crate::host::MacHost;
use crate::{MacError, Result};

#[derive(Debug)]
pub(super) struct CcaPoller {
    node: NodeId,
    polling: bool,
    polls_made: u32,
    busy_results: u32,
}

impl CcaPoller {
    pub(super) fn new(node: NodeId) -> Self {
        Self {
            node,
            polling: false,
            polls_made: 0,
            busy_results: 0,
        }
    }

    pub(super) fn start<H: MacHost<BoxMacTimer>>(&mut self, host: &mut H, config: &BoxMacConfig) -> Result<()> {
        if self.polling {
            return Err(MacError::ProtocolViolation {
                state: "Cca",
                detail: "asked to start polling while already polling".to_string(),
            });
        }
        self.polls_made = 0;
        self.busy_results = 0;
        self.polling = true;

        log::trace!("[node {}] <Cca> Radio to RX, waiting for transition before first poll", self.node);
        host.set_radio_state(RadioState::Rx);
        host.start_timer(BoxMacTimer::CcaRxTransition, config.wait_for_rx_transition)?;
        Ok(())
    }

    /// Both CCA timers lead to one more poll.
    pub(super) fn poll<H: MacHost<BoxMacTimer>>(
        &mut self,
        host: &mut H,
        config: &BoxMacConfig,
        signals: &mut VecDeque<Signal>,
    ) -> Result<()> {
        match host.sample_cca() {
            CcaResult::Clear => self.polls_made += 1,
            CcaResult::Busy => {
                log::trace!("[node {}] <Cca> Poll result busy", self.node);
                self.polls_made += 1;
                self.busy_results += 1;
            }
            result @ (CcaResult::NotValid | CcaResult::NotValidYet) => {
                log::warn!(
                    "[node {}] <Cca> Poll returned {:?}, fine if only on the first poll",
                    self.node,
                    result
                );
            }
        }

        if self.busy_results >= config.min_required_busy_cca_results {
            host.count("BoxMac CCA busy");
            self.polling = false;
            signals.push_back(Signal::CcaBusy);
        } else if self.polls_made >= config.max_cca_checks {
            host.count("BoxMac CCA clear");
            self.polling = false;
            signals.push_back(Signal::CcaClear);
        } else {
            host.start_timer(BoxMacTimer::CcaPollDelay, config.time_for_one_cca_check)?;
        }
        Ok(())
    }

    pub(super) fn reset(&mut self) {
        self.polling = false;
        self.polls_made = 0;
        self.busy_results = 0;
    }
}
