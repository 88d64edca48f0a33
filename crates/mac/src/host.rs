//! the environment a MAC instance runs in, and the surface it exposes upward

use std::time::Duration;

use bytes::Bytes;
use wsn_core::{Destination, NodeId, Radio, StatsSink, TimerKind, TimerService};

use crate::{MacFrame, Result};

pub use wsn_core::SendOutcome;

/// Routing layer as seen from the MAC.
pub trait UpperLayer {
    fn deliver(&mut self, frame: MacFrame);

    fn report_send_result(&mut self, neighbor: NodeId, outcome: SendOutcome);
}

/// Everything a MAC state machine can touch: radio, timers, upper layer, stats.
pub trait MacHost<K: TimerKind>: Radio + TimerService<K> + UpperLayer + StatsSink {
    fn now(&self) -> Duration;

    /// Hands the frame to the radio and switches it to TX. The radio returns
    /// to its previous state once the frame is on air.
    fn transmit(&mut self, frame: MacFrame);
}

/// Result of handing a packet to the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    Overflow,
}

/// Common surface of the MAC protocols. Every handler runs to completion;
/// an `Err` is a protocol invariant violation and is not recoverable.
pub trait MacProtocol {
    type Timer: TimerKind;

    fn node_id(&self) -> NodeId;

    fn state_name(&self) -> &'static str;

    fn startup<H: MacHost<Self::Timer>>(&mut self, host: &mut H) -> Result<()>;

    fn submit<H: MacHost<Self::Timer>>(
        &mut self,
        host: &mut H,
        payload: Bytes,
        destination: Destination,
    ) -> Result<Admission>;

    fn on_frame<H: MacHost<Self::Timer>>(&mut self, host: &mut H, frame: MacFrame) -> Result<()>;

    fn on_timer<H: MacHost<Self::Timer>>(&mut self, host: &mut H, timer: Self::Timer) -> Result<()>;

    /// Energy loss: forget every packet, flag and timer of this power epoch.
    /// Sequence counters survive.
    fn reset_epoch<H: MacHost<Self::Timer>>(&mut self, host: &mut H);

    /// End-of-run statistics.
    fn finish<H: MacHost<Self::Timer>>(&mut self, host: &mut H);

    fn buffered(&self) -> usize;
}
