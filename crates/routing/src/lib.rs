//! network layer: CTP and MMBCR collection trees over a duty-cycled MAC, plus static routing

use thiserror::Error;
use wsn_core::{Destination, NodeId, TimerError};

pub mod config;
pub mod controller;
pub mod duplicate;
pub mod host;
pub mod link_estimator;
pub mod packet;
pub mod policy;
pub mod static_routing;
pub mod table;
pub mod trickle;

#[cfg(test)]
pub(crate) mod testing;

pub use config::RoutingConfig;
pub use controller::{CtpRouting, MmbcrRouting, RoutingNode};
pub use duplicate::DuplicateHistory;
pub use host::{RoutingHost, RoutingProtocol, RoutingTimer};
pub use link_estimator::LinkEstimator;
pub use packet::{PacketKind, RoutingPacket};
pub use policy::{CtpPolicy, MmbcrPolicy, ParentPolicy};
pub use static_routing::StaticRouting;
pub use table::{RouteEntry, RouteNotice, RouteTable};
pub use trickle::BeaconSender;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Application packet addressed to {destination}, but only the sink {sink} can be a destination")]
    NotForSink { destination: Destination, sink: NodeId },

    #[error("The sink does not originate application packets")]
    SinkCannotSend,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Failed to encode routing packet: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode routing packet: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Timer(#[from] TimerError),
}

pub type Result<T> = std::result::Result<T, RoutingError>;
