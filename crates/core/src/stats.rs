//! statistics sink shared by all protocol layers

use std::collections::BTreeMap;

use serde::Serialize;

/// Fire-and-forget statistics collection. Never influences protocol behaviour.
pub trait StatsSink {
    fn count(&mut self, name: &str);

    fn count_labelled(&mut self, name: &str, label: &str);

    fn record(&mut self, name: &str, value: f64);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.total += value;
    }

    fn merge(&mut self, other: &Summary) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.count += other.count;
        self.total += other.total;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// In-memory collector. Labelled counters are keyed `"name: label"`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    counters: BTreeMap<String, u64>,
    samples: BTreeMap<String, Summary>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn labelled(&self, name: &str, label: &str) -> u64 {
        self.counter(&labelled_key(name, label))
    }

    pub fn summary(&self, name: &str) -> Option<&Summary> {
        self.samples.get(name)
    }

    pub fn counters(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn samples(&self) -> impl Iterator<Item = (&str, &Summary)> {
        self.samples.iter().map(|(name, summary)| (name.as_str(), summary))
    }

    pub fn merge(&mut self, other: &Stats) {
        for (name, value) in &other.counters {
            *self.counters.entry(name.clone()).or_insert(0) += value;
        }
        for (name, summary) in &other.samples {
            self.samples.entry(name.clone()).or_default().merge(summary);
        }
    }
}

impl StatsSink for Stats {
    fn count(&mut self, name: &str) {
        *self.counters.entry(name.to_string()).or_insert(0) += 1;
    }

    fn count_labelled(&mut self, name: &str, label: &str) {
        *self.counters.entry(labelled_key(name, label)).or_insert(0) += 1;
    }

    fn record(&mut self, name: &str, value: f64) {
        self.samples.entry(name.to_string()).or_default().add(value);
    }
}

fn labelled_key(name: &str, label: &str) -> String {
    format!("{}: {}", name, label)
}
