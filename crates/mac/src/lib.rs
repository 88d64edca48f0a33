//! duty-cycled MAC protocols: RICER (receiver initiated) and BoxMac (low power listening)

use thiserror::Error;
use wsn_core::{NodeId, TimerError};

pub mod backoff;
pub mod boxmac;
pub mod buffer;
pub mod frame;
pub mod host;
pub mod ricer;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BinaryExponentialBackoff;
pub use boxmac::{BoxMac, BoxMacConfig, BoxMacTimer};
pub use buffer::{BufferFull, BufferedPacket, TransmitBuffer};
pub use frame::{FrameKind, MacFrame};
pub use host::{Admission, MacHost, MacProtocol, SendOutcome, UpperLayer};
pub use ricer::{MacTimer, RicerConfig, RicerMac};

#[derive(Debug, Error)]
pub enum MacError {
    #[error("Backoff slot duration must be greater than zero")]
    ZeroBackoffSlot,

    #[error("Timer {timer} fired in state {state}, which never arms it")]
    UnexpectedTimer { state: &'static str, timer: String },

    #[error("Protocol violation in state {state}: {detail}")]
    ProtocolViolation { state: &'static str, detail: String },

    #[error("No buffered packet for node {0}")]
    NoPacketFor(NodeId),

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: &'static str, to: &'static str },

    #[error(transparent)]
    Timer(#[from] TimerError),
}

pub type Result<T> = std::result::Result<T, MacError>;
