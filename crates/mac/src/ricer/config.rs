use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsn_core::NodeId;

/// RICER parameters. Frame sizes feed the derived dwell and ACK timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RicerConfig {
    pub self_node_id: NodeId,
    pub wait_for_rx_transition: Duration,
    pub wait_for_sleep_transition: Duration,
    pub beb_slot_duration: Duration,
    pub beb_max_exponent: u32,
    pub send_data_backoff_min: Duration,
    pub send_data_backoff_max: Duration,
    /// kbit/s
    pub phy_data_rate: f64,
    pub mac_buffer_size: usize,
    pub wake_for_receive_interval: Duration,
    pub wake_for_receive_jitter: Duration,
    pub max_send_retries: u32,
    pub wait_for_tx_complete_after_invalid_cca: Duration,
    pub ack_rtr_frame_bits: u32,
    pub rtr_frame_bits: u32,
    pub data_frame_bits: u32,
    pub phy_overhead_bytes: u32,
    pub network_data_overhead_bits: u32,
    pub app_overhead_bytes: u32,
    pub response_multiplier: u32,
}

impl Default for RicerConfig {
    fn default() -> Self {
        Self {
            self_node_id: 0,
            wait_for_rx_transition: Duration::from_micros(200),
            wait_for_sleep_transition: Duration::from_micros(50),
            beb_slot_duration: Duration::from_micros(320),
            beb_max_exponent: 5,
            send_data_backoff_min: Duration::ZERO,
            send_data_backoff_max: Duration::from_millis(5),
            phy_data_rate: 250.0,
            mac_buffer_size: 32,
            wake_for_receive_interval: Duration::from_secs(1),
            wake_for_receive_jitter: Duration::from_millis(100),
            max_send_retries: 3,
            wait_for_tx_complete_after_invalid_cca: Duration::from_millis(2),
            ack_rtr_frame_bits: 88,
            rtr_frame_bits: 72,
            data_frame_bits: 96,
            phy_overhead_bytes: 6,
            network_data_overhead_bits: 200,
            app_overhead_bytes: 5,
            response_multiplier: 3,
        }
    }
}

impl RicerConfig {
    pub fn for_node(self_node_id: NodeId) -> Self {
        Self {
            self_node_id,
            ..Default::default()
        }
    }

    pub fn total_data_frame_bits(&self) -> u32 {
        self.phy_overhead_bytes * 8
            + self.data_frame_bits
            + self.network_data_overhead_bits
            + self.app_overhead_bytes * 8
    }

    pub fn total_beacon_frame_bits(&self) -> u32 {
        self.phy_overhead_bytes * 8 + self.rtr_frame_bits
    }

    pub fn total_ack_frame_bits(&self) -> u32 {
        self.phy_overhead_bytes * 8 + self.ack_rtr_frame_bits
    }

    /// How long a receiver listens after sending an RTR: the sender's worst
    /// backoff plus the data and beacon airtime, scaled for turnaround.
    pub fn listen_for_data_dwell(&self) -> Duration {
        self.send_data_backoff_max
            + self.exchange_time(self.total_data_frame_bits() / 8 + self.total_beacon_frame_bits() / 8)
    }

    pub fn wait_for_ack_time(&self) -> Duration {
        self.send_data_backoff_max
            + self.exchange_time(self.total_data_frame_bits() / 8 + self.total_ack_frame_bits() / 8)
    }

    /// Jitter-free upper bound of the send timeout.
    pub fn send_timeout(&self) -> Duration {
        self.wake_for_receive_interval + self.wake_for_receive_jitter
    }

    fn exchange_time(&self, bytes: u32) -> Duration {
        let bytes_per_second = 1000.0 * self.phy_data_rate / 8.0;
        Duration::from_secs_f64(bytes as f64 / bytes_per_second * self.response_multiplier as f64)
    }
}
