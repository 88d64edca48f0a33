//! radio facade consumed by the MAC protocols

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioState {
    Rx,
    Tx,
    Sleep,
}

/// Outcome of a clear channel assessment.
///
/// `NotValid` is returned while the radio is not receiving (sleeping or
/// transmitting), `NotValidYet` while it has entered RX too recently for the
/// RSSI reading to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CcaResult {
    Clear,
    Busy,
    NotValid,
    NotValidYet,
}

pub trait Radio {
    fn set_radio_state(&mut self, state: RadioState);

    /// Synchronous CCA sample.
    fn sample_cca(&mut self) -> CcaResult;
}
