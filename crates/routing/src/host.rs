//! the environment a routing instance runs in, and the surface it exposes

use std::time::Duration;

use bytes::Bytes;
use wsn_core::{Destination, NodeId, SendOutcome, StatsSink, TimerService};

use crate::{Result, RoutingPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingTimer {
    LoopRepair,
    DelayRouteDiscovery,
    SendNextBeacon,
}

/// Everything a routing layer can touch: timers, the MAC below, the
/// application above, stats and the node's battery level.
pub trait RoutingHost: TimerService<RoutingTimer> + StatsSink {
    fn now(&self) -> Duration;

    /// Hands an encoded packet to the MAC.
    fn to_mac(&mut self, payload: Bytes, destination: Destination);

    fn deliver_to_app(&mut self, packet: RoutingPacket);

    /// Usable stored energy as a fraction of the maximum, in [0, 1].
    fn battery_fraction(&self) -> f64;
}

/// Common surface of the routing layers. As with the MACs, an `Err` is a
/// fatal protocol violation.
pub trait RoutingProtocol {
    fn node_id(&self) -> NodeId;

    fn startup<H: RoutingHost>(&mut self, host: &mut H) -> Result<()>;

    fn from_app<H: RoutingHost>(&mut self, host: &mut H, payload: Bytes, destination: Destination) -> Result<()>;

    fn from_mac<H: RoutingHost>(&mut self, host: &mut H, payload: Bytes) -> Result<()>;

    fn on_send_result<H: RoutingHost>(&mut self, host: &mut H, neighbor: NodeId, outcome: SendOutcome) -> Result<()>;

    fn on_timer<H: RoutingHost>(&mut self, host: &mut H, timer: RoutingTimer) -> Result<()>;

    /// Energy loss: drop buffered packets and route state. Sequence
    /// counters and duplicate history survive.
    fn reset_epoch<H: RoutingHost>(&mut self, host: &mut H);

    fn finish<H: RoutingHost>(&mut self, host: &mut H);

    fn buffered(&self) -> usize;
}
