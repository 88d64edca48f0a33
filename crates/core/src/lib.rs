//! shared node types and facades for the duty-cycled sensor network stack

pub mod radio;
pub mod stats;
pub mod timer;
pub mod types;

pub use radio::{CcaResult, Radio, RadioState};
pub use stats::{Stats, StatsSink, Summary};
pub use timer::{ArmedTimer, PausableTimer, TimerBank, TimerError, TimerKind, TimerService};
pub use types::{Destination, NodeId, SendOutcome};
