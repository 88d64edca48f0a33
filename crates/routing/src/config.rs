use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsn_core::NodeId;

/// Parameters shared by the CTP, MMBCR and static routing layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub self_node_id: NodeId,
    pub sink_node_id: NodeId,

    pub routing_table_size: usize,
    /// Entries with an SH-ETX at or above this are the first eviction victims.
    pub eviction_etx_threshold: f64,
    /// An SH-ETX above this removes the neighbor from the table.
    pub unreachable_sh_etx_threshold: f64,
    /// CTP only switches parent for an MH-ETX improvement larger than this.
    pub parent_switch_margin: f64,

    pub weighting_mmbcr: f64,
    pub weighting_mh_etx: f64,
    /// Combined MMBCR metric gain required to switch parent.
    pub parent_switch_threshold: f64,

    pub trickle_min: Duration,
    pub trickle_max: Duration,
    /// Keep beaconing at `trickle_min` instead of doubling.
    pub static_frequency: bool,

    pub repair_loop_wait_min: Duration,
    pub repair_loop_wait_max: Duration,
    pub max_loop_repairs_per_packet: u32,

    pub buffer_size: usize,
    pub implement_retries: bool,
    pub max_packet_send_retries: u32,
    pub delay_before_route_discovery: Duration,

    pub in_beacon_window: usize,
    pub out_message_window: usize,
    pub in_lq_smoothing: f64,
    pub etx_smoothing: f64,

    /// Next hop for static routing.
    pub route_to_node: NodeId,
    pub duplicate_history_size: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            self_node_id: 0,
            sink_node_id: 0,
            routing_table_size: 10,
            eviction_etx_threshold: 6.5,
            unreachable_sh_etx_threshold: 10.0,
            parent_switch_margin: 1.5,
            weighting_mmbcr: 0.5,
            weighting_mh_etx: 0.5,
            parent_switch_threshold: 0.1,
            trickle_min: Duration::from_secs(1),
            trickle_max: Duration::from_secs(60),
            static_frequency: false,
            repair_loop_wait_min: Duration::from_millis(500),
            repair_loop_wait_max: Duration::from_secs(1),
            max_loop_repairs_per_packet: 3,
            buffer_size: 32,
            implement_retries: true,
            max_packet_send_retries: 5,
            delay_before_route_discovery: Duration::ZERO,
            in_beacon_window: 3,
            out_message_window: 5,
            in_lq_smoothing: 0.4,
            etx_smoothing: 0.4,
            route_to_node: 0,
            duplicate_history_size: 4,
        }
    }
}

impl RoutingConfig {
    pub fn for_node(self_node_id: NodeId) -> Self {
        Self {
            self_node_id,
            ..Default::default()
        }
    }

    pub fn is_sink(&self) -> bool {
        self.self_node_id == self.sink_node_id
    }

    /// Loop repair wait for a uniform sample `fraction` in [0, 1).
    pub fn repair_loop_wait(&self, fraction: f64) -> Duration {
        let range = self.repair_loop_wait_max.saturating_sub(self.repair_loop_wait_min);
        self.repair_loop_wait_min + range.mul_f64(fraction.clamp(0.0, 1.0))
    }
}
