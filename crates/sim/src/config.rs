use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsn_core::NodeId;
use wsn_mac::{BoxMacConfig, RicerConfig};
use wsn_routing::RoutingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacChoice {
    Ricer,
    BoxMac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingChoice {
    Ctp,
    Mmbcr,
    /// Every node forwards to the node below it in the id order, ending at the sink.
    Static,
}

/// One symmetric radio link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub from: NodeId,
    pub to: NodeId,
    /// Probability that a frame which survived collisions is still lost.
    pub loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TopologyLayout {
    /// Nodes at the given coordinates (metres) hear each other within `range`.
    UnitDisk {
        positions: Vec<(f64, f64)>,
        range: f64,
        loss: f64,
    },
    /// Nodes 0..n evenly spaced on a line, each hearing only its direct neighbours.
    Line { nodes: usize, loss: f64 },
    /// Explicit symmetric links between `nodes` nodes.
    Links { nodes: usize, links: Vec<LinkConfig> },
}

impl TopologyLayout {
    pub fn node_count(&self) -> usize {
        match self {
            TopologyLayout::UnitDisk { positions, .. } => positions.len(),
            TopologyLayout::Line { nodes, .. } => *nodes,
            TopologyLayout::Links { nodes, .. } => *nodes,
        }
    }
}

/// Medium timing. Propagation is instantaneous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// kbit/s
    pub phy_kbps: f64,
    /// RSSI settling time after entering RX, during which CCA is not valid yet.
    pub cca_settle: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            phy_kbps: 250.0,
            cca_settle: Duration::from_micros(128),
        }
    }
}

impl ChannelConfig {
    pub fn airtime(&self, bits: u32) -> Duration {
        Duration::from_secs_f64(bits as f64 / (self.phy_kbps * 1000.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// Mean of the exponential inter-arrival time per source node.
    pub mean_interval: Duration,
    pub payload_bytes: usize,
    /// No application traffic before this, so the tree can form.
    pub start_after: Duration,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            mean_interval: Duration::from_secs(30),
            payload_bytes: 16,
            start_after: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerAction {
    Loss,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerEvent {
    pub at: Duration,
    pub node: NodeId,
    pub action: PowerAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub seed: u64,
    pub duration: Duration,
    pub sink: NodeId,
    pub mac: MacChoice,
    pub routing: RoutingChoice,
    pub topology: TopologyLayout,
    pub channel: ChannelConfig,
    pub traffic: TrafficConfig,
    pub power_schedule: Vec<PowerEvent>,
    /// Battery fraction lost per transmitted frame, seen by MMBCR.
    pub battery_drain_per_frame: f64,
    /// Templates; the node id is filled in per node.
    pub ricer: RicerConfig,
    pub boxmac: BoxMacConfig,
    pub routing_params: RoutingConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            duration: Duration::from_secs(600),
            sink: 0,
            mac: MacChoice::Ricer,
            routing: RoutingChoice::Ctp,
            topology: TopologyLayout::Line { nodes: 4, loss: 0.05 },
            channel: ChannelConfig::default(),
            traffic: TrafficConfig::default(),
            power_schedule: Vec::new(),
            battery_drain_per_frame: 0.0005,
            ricer: RicerConfig::default(),
            boxmac: BoxMacConfig::default(),
            routing_params: RoutingConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn node_count(&self) -> usize {
        self.topology.node_count()
    }

    pub fn ricer_for(&self, node: NodeId) -> RicerConfig {
        RicerConfig {
            self_node_id: node,
            ..self.ricer.clone()
        }
    }

    pub fn boxmac_for(&self, node: NodeId) -> BoxMacConfig {
        BoxMacConfig {
            self_node_id: node,
            ..self.boxmac.clone()
        }
    }

    pub fn routing_for(&self, node: NodeId) -> RoutingConfig {
        RoutingConfig {
            self_node_id: node,
            sink_node_id: self.sink,
            route_to_node: node.saturating_sub(1),
            ..self.routing_params.clone()
        }
    }
}
