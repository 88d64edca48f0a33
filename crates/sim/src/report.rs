use std::fmt;
use std::time::Duration;

use serde::Serialize;
use wsn_core::{NodeId, Stats};

use crate::config::{MacChoice, RoutingChoice, SimConfig};

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node: NodeId,
    pub powered: bool,
    pub battery: f64,
    pub stats: Stats,
}

/// Outcome of one run. Counters are summed over every node plus the channel.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub mac: MacChoice,
    pub routing: RoutingChoice,
    pub seed: u64,
    pub duration: Duration,
    pub events: u64,
    pub generated: u64,
    pub delivered: u64,
    pub delivery_ratio: f64,
    pub totals: Stats,
    pub per_node: Vec<NodeReport>,
}

impl SimReport {
    pub fn new(config: &SimConfig, events: u64, channel: &Stats, per_node: Vec<NodeReport>) -> Self {
        let mut totals = channel.clone();
        for node in &per_node {
            totals.merge(&node.stats);
        }
        let generated = totals.counter("Application packets generated");
        let delivered = totals.counter("Application packets received");
        let delivery_ratio = if generated == 0 {
            0.0
        } else {
            delivered as f64 / generated as f64
        };
        Self {
            mac: config.mac,
            routing: config.routing,
            seed: config.seed,
            duration: config.duration,
            events,
            generated,
            delivered,
            delivery_ratio,
            totals,
            per_node,
        }
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        self.totals.summary("Application latency ms").map(|summary| summary.mean())
    }
}

impl fmt::Display for SimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?} + {:?}, seed {}, {:?} simulated, {} events",
            self.mac, self.routing, self.seed, self.duration, self.events
        )?;
        writeln!(
            f,
            "  delivered {}/{} ({:.1}%)",
            self.delivered,
            self.generated,
            self.delivery_ratio * 100.0
        )?;
        if let Some(latency) = self.mean_latency_ms() {
            writeln!(f, "  mean latency {:.1} ms", latency)?;
        }
        for (name, value) in self.totals.counters() {
            writeln!(f, "  {:<60} {}", name, value)?;
        }
        for (name, summary) in self.totals.samples() {
            writeln!(
                f,
                "  {:<60} n={} mean={:.2} min={:.2} max={:.2}",
                name,
                summary.count,
                summary.mean(),
                summary.min,
                summary.max
            )?;
        }
        Ok(())
    }
}
