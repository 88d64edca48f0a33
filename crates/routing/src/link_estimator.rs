//! single-hop ETX from beacon reception and unicast ACK ratios

use std::collections::{HashMap, VecDeque};

use wsn_core::{NodeId, SendOutcome, StatsSink};

use crate::{ParentPolicy, RouteNotice, RouteTable, RoutingConfig, RoutingPacket};

#[derive(Debug, Default)]
struct Neighbor {
    last_beacon: Option<u32>,
    in_window: Vec<u32>,
    previous_in_lq: Option<f64>,
    previous_etx: Option<f64>,
    out_window: Vec<bool>,
}

pub struct LinkEstimator {
    node: NodeId,
    in_window_size: usize,
    out_window_size: usize,
    in_lq_smoothing: f64,
    etx_smoothing: f64,
    neighbors: HashMap<NodeId, Neighbor>,
    /// Unacknowledged sends since the last ACK, across all neighbors.
    failures_since_success: u32,
}

impl LinkEstimator {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            node: config.self_node_id,
            in_window_size: config.in_beacon_window.max(1),
            out_window_size: config.out_message_window.max(1),
            in_lq_smoothing: config.in_lq_smoothing,
            etx_smoothing: config.etx_smoothing,
            neighbors: HashMap::new(),
            failures_since_success: 0,
        }
    }

    /// Latest smoothed ETX towards `neighbor`.
    pub fn etx(&self, neighbor: NodeId) -> Option<f64> {
        self.neighbors.get(&neighbor).and_then(|n| n.previous_etx)
    }

    pub fn on_beacon<P: ParentPolicy, S: StatsSink>(
        &mut self,
        stats: &mut S,
        beacon: &RoutingPacket,
        table: &mut RouteTable<P>,
        notices: &mut VecDeque<RouteNotice>,
    ) {
        let from = beacon.source;
        let seq = beacon.sequence_number;
        let neighbor = self.neighbors.entry(from).or_default();
        if neighbor.last_beacon == Some(seq) {
            log::trace!("[node {}] <LinkEstimator> Ignoring duplicate beacon {} from {}", self.node, seq, from);
            return;
        }
        neighbor.last_beacon = Some(seq);

        if neighbor.in_window.first().is_some_and(|first| *first >= seq) {
            log::warn!(
                "[node {}] <LinkEstimator> Beacon {} from {} is behind the window, assuming the node restarted",
                self.node,
                seq,
                from
            );
            neighbor.in_window.clear();
        }
        neighbor.in_window.push(seq);

        if neighbor.in_window.len() >= self.in_window_size {
            let first = neighbor.in_window[0];
            let last = neighbor.in_window[neighbor.in_window.len() - 1];
            let broadcast = (last - first + 1) as f64;
            let mut in_lq = broadcast / self.in_window_size as f64;
            if let Some(previous) = neighbor.previous_in_lq {
                in_lq = self.in_lq_smoothing * in_lq + (1.0 - self.in_lq_smoothing) * previous;
            }
            log::trace!("[node {}] <LinkEstimator> Incoming LQ of {}: {:.2}", self.node, from, in_lq);
            neighbor.previous_in_lq = Some(in_lq);
            neighbor.in_window.clear();
            self.update_etx(stats, from, in_lq, table, notices);
        }

        table.update_remote(stats, from, beacon.multihop_etx, beacon.parent, notices);
    }

    pub fn on_send_result<P: ParentPolicy, S: StatsSink>(
        &mut self,
        stats: &mut S,
        neighbor_id: NodeId,
        outcome: SendOutcome,
        table: &mut RouteTable<P>,
        notices: &mut VecDeque<RouteNotice>,
    ) {
        let neighbor = self.neighbors.entry(neighbor_id).or_default();
        neighbor.out_window.push(outcome == SendOutcome::Acked);
        if neighbor.out_window.len() < self.out_window_size {
            return;
        }

        let acked = neighbor.out_window.iter().filter(|acked| **acked).count();
        neighbor.out_window.clear();
        let out_lq = if acked == 0 {
            self.failures_since_success += self.out_window_size as u32;
            log::debug!(
                "[node {}] <LinkEstimator> No ACKs from {} in window, {} failures since last success",
                self.node,
                neighbor_id,
                self.failures_since_success
            );
            self.failures_since_success as f64
        } else {
            self.failures_since_success = 0;
            self.out_window_size as f64 / acked as f64
        };
        self.update_etx(stats, neighbor_id, out_lq, table, notices);
    }

    /// Energy loss.
    pub fn reset(&mut self) {
        self.neighbors.clear();
        self.failures_since_success = 0;
    }

    fn update_etx<P: ParentPolicy, S: StatsSink>(
        &mut self,
        stats: &mut S,
        neighbor_id: NodeId,
        sample: f64,
        table: &mut RouteTable<P>,
        notices: &mut VecDeque<RouteNotice>,
    ) {
        let neighbor = self.neighbors.entry(neighbor_id).or_default();
        let etx = match neighbor.previous_etx {
            Some(previous) => self.etx_smoothing * sample + (1.0 - self.etx_smoothing) * previous,
            None => sample,
        };
        neighbor.previous_etx = Some(etx);
        log::debug!("[node {}] <LinkEstimator> ETX to {}: {:.2}", self.node, neighbor_id, etx);
        stats.record("LinkEstimator LQ", etx);
        table.update_sh_etx(stats, neighbor_id, etx, notices);
    }
}
