//! discrete-event simulation of a sensor network running the duty-cycled stack

pub mod config;
pub mod event;
pub mod medium;
pub mod node;
pub mod report;
pub mod scenarios;
pub mod simulation;
pub mod topology;

use std::time::Duration;

use thiserror::Error;
use wsn_core::NodeId;
use wsn_mac::MacError;
use wsn_routing::RoutingError;

pub use config::{
    ChannelConfig, LinkConfig, MacChoice, PowerAction, PowerEvent, RoutingChoice, SimConfig, TopologyLayout,
    TrafficConfig,
};
pub use node::Node;
pub use report::{NodeReport, SimReport};
pub use simulation::Simulation;
pub use topology::Topology;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("MAC of node {node} failed: {source}")]
    Mac { node: NodeId, source: MacError },

    #[error("Routing of node {node} failed: {source}")]
    Routing { node: NodeId, source: RoutingError },

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub struct SimulationPresets;

impl SimulationPresets {
    pub fn good_conditions() -> SimConfig {
        SimConfig {
            topology: TopologyLayout::Line { nodes: 4, loss: 0.02 },
            ..Default::default()
        }
    }

    pub fn average_conditions() -> SimConfig {
        SimConfig {
            seed: 2,
            routing: RoutingChoice::Mmbcr,
            // 3x3 grid, 10 m apart; diagonals are out of range
            topology: grid(3, 10.0, 12.0, 0.15),
            ..Default::default()
        }
    }

    pub fn poor_conditions() -> SimConfig {
        SimConfig {
            seed: 3,
            mac: MacChoice::BoxMac,
            topology: grid(3, 10.0, 12.0, 0.30),
            traffic: TrafficConfig {
                mean_interval: Duration::from_secs(60),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn extreme_conditions() -> SimConfig {
        SimConfig {
            seed: 4,
            mac: MacChoice::BoxMac,
            routing: RoutingChoice::Mmbcr,
            topology: TopologyLayout::Line { nodes: 6, loss: 0.5 },
            traffic: TrafficConfig {
                mean_interval: Duration::from_secs(90),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Hand-configured chain towards the sink, as a baseline for the trees.
    pub fn static_chain() -> SimConfig {
        SimConfig {
            seed: 5,
            routing: RoutingChoice::Static,
            topology: TopologyLayout::Line { nodes: 4, loss: 0.05 },
            ..Default::default()
        }
    }

    /// The middle of a line loses power for a minute and comes back.
    pub fn power_cycling() -> SimConfig {
        let outage = |at: u64, action| PowerEvent {
            at: Duration::from_secs(at),
            node: 2,
            action,
        };
        SimConfig {
            seed: 6,
            topology: TopologyLayout::Line { nodes: 5, loss: 0.05 },
            power_schedule: vec![outage(200, PowerAction::Loss), outage(260, PowerAction::Restore)],
            ..Default::default()
        }
    }

    pub fn all() -> Vec<(&'static str, SimConfig)> {
        vec![
            ("good", Self::good_conditions()),
            ("average", Self::average_conditions()),
            ("poor", Self::poor_conditions()),
            ("extreme", Self::extreme_conditions()),
            ("static", Self::static_chain()),
            ("power cycling", Self::power_cycling()),
        ]
    }
}

/// `side` x `side` nodes, `spacing` metres apart, node 0 in a corner.
fn grid(side: usize, spacing: f64, range: f64, loss: f64) -> TopologyLayout {
    let positions = (0..side * side)
        .map(|i| ((i % side) as f64 * spacing, (i / side) as f64 * spacing))
        .collect();
    TopologyLayout::UnitDisk { positions, range, loss }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_build_valid_topologies() {
        for (name, config) in SimulationPresets::all() {
            let topology = Topology::from_layout(&config.topology).unwrap();
            assert!((config.sink as usize) < topology.node_count(), "{}", name);
            for node in topology.nodes() {
                assert!(topology.neighbors(node).next().is_some(), "{}: node {} is isolated", name, node);
            }
        }
    }

    #[test]
    fn test_grid_spacing() {
        let topology = Topology::from_layout(&grid(3, 10.0, 12.0, 0.0)).unwrap();
        assert!(topology.in_range(0, 1));
        assert!(topology.in_range(0, 3));
        assert!(!topology.in_range(0, 4));
        assert_eq!(topology.neighbors(4).count(), 4);
    }
}
