use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsn_core::NodeId;

/// BoxMac parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxMacConfig {
    pub self_node_id: NodeId,
    /// Length of one LPL sleep period.
    pub sleep_time: Duration,
    pub receive_period_after_cca_busy: Duration,
    pub data_frame_bits: u32,
    pub ack_frame_bits: u32,
    pub max_cca_checks: u32,
    pub min_required_busy_cca_results: u32,
    pub time_for_one_cca_check: Duration,
    pub wait_for_rx_transition: Duration,
    pub initial_backoff_min: Duration,
    pub initial_backoff_max: Duration,
    pub congestion_backoff_min: Duration,
    pub congestion_backoff_max: Duration,
    pub inter_transmission_ack_receive_delay: Duration,
    pub inter_transmission_broadcast_delay: Duration,
    /// Added to `sleep_time` so a train outlasts a receiver's full sleep.
    pub lpl_wake_interval_send_padding: Duration,
    pub max_message_buffer_size: usize,
}

impl Default for BoxMacConfig {
    fn default() -> Self {
        Self {
            self_node_id: 0,
            sleep_time: Duration::from_millis(250),
            receive_period_after_cca_busy: Duration::from_millis(20),
            data_frame_bits: 448,
            ack_frame_bits: 88,
            max_cca_checks: 100,
            min_required_busy_cca_results: 2,
            time_for_one_cca_check: Duration::from_micros(100),
            wait_for_rx_transition: Duration::from_micros(200),
            initial_backoff_min: Duration::from_micros(320),
            initial_backoff_max: Duration::from_micros(1600),
            congestion_backoff_min: Duration::from_micros(320),
            congestion_backoff_max: Duration::from_micros(2560),
            inter_transmission_ack_receive_delay: Duration::from_millis(3),
            inter_transmission_broadcast_delay: Duration::from_micros(500),
            lpl_wake_interval_send_padding: Duration::from_millis(20),
            max_message_buffer_size: 32,
        }
    }
}

impl BoxMacConfig {
    pub fn for_node(self_node_id: NodeId) -> Self {
        Self {
            self_node_id,
            ..Default::default()
        }
    }

    /// How long a message train keeps repeating one frame.
    pub fn train_duration(&self) -> Duration {
        self.sleep_time + self.lpl_wake_interval_send_padding
    }

    pub fn initial_backoff(&self, fraction: f64) -> Duration {
        spread(self.initial_backoff_min, self.initial_backoff_max, fraction)
    }

    pub fn congestion_backoff(&self, fraction: f64) -> Duration {
        spread(self.congestion_backoff_min, self.congestion_backoff_max, fraction)
    }
}

fn spread(min: Duration, max: Duration, fraction: f64) -> Duration {
    min + max.saturating_sub(min).mul_f64(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_covers_sleep_period() {
        let config = BoxMacConfig::default();
        assert_eq!(config.train_duration(), Duration::from_millis(270));
        assert!(config.train_duration() > config.sleep_time);
    }

    #[test]
    fn test_backoff_spread() {
        let config = BoxMacConfig {
            initial_backoff_min: Duration::from_millis(1),
            initial_backoff_max: Duration::from_millis(3),
            ..Default::default()
        };
        assert_eq!(config.initial_backoff(0.0), Duration::from_millis(1));
        assert_eq!(config.initial_backoff(0.5), Duration::from_millis(2));

        let inverted = BoxMacConfig {
            congestion_backoff_min: Duration::from_millis(4),
            congestion_backoff_max: Duration::from_millis(1),
            ..Default::default()
        };
        assert_eq!(inverted.congestion_backoff(0.9), Duration::from_millis(4));
    }
}
