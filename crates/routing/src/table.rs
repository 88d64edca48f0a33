//! bounded neighbor table and parent selection for the collection tree

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wsn_core::{NodeId, StatsSink};

use crate::{ParentPolicy, RoutingConfig};

macro_rules! table_log {
    ($level:ident, $table:expr, $($arg:tt)+) => {
        log::$level!("[node {}] <{}> {}", $table.node, P::NAME, format_args!($($arg)+))
    };
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteEntry {
    pub sh_etx: Option<f64>,
    pub mh_etx: Option<f64>,
    pub parent: Option<NodeId>,
    pub battery_chain: Vec<f64>,
}

impl RouteEntry {
    /// ETX to the sink through this neighbor.
    pub fn path_etx(&self) -> Option<f64> {
        Some(self.mh_etx? + self.sh_etx?)
    }
}

/// Route changes the table reports to the beacon sender and the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteNotice {
    /// Our advertised MH-ETX changed.
    MultihopEtx(Option<f64>),
    /// Beacon sender adopts the parent and resets trickle.
    NewParent(NodeId),
    /// Controller's view of the route.
    Route { parent: Option<NodeId>, multihop_etx: Option<f64> },
    ResetTrickleAndPull,
    /// Battery chain of the current parent, empty without one.
    ParentBatteryChain(Vec<f64>),
}

pub struct RouteTable<P: ParentPolicy> {
    node: NodeId,
    sink: NodeId,
    capacity: usize,
    eviction_etx_threshold: f64,
    unreachable_sh_etx_threshold: f64,
    entries: BTreeMap<NodeId, RouteEntry>,
    parent: Option<NodeId>,
    multihop_etx: Option<f64>,
    policy: P,
    rng: StdRng,
}

impl<P: ParentPolicy> RouteTable<P> {
    pub fn new(config: &RoutingConfig, policy: P, seed: u64) -> Self {
        let mut table = Self {
            node: config.self_node_id,
            sink: config.sink_node_id,
            capacity: config.routing_table_size.max(1),
            eviction_etx_threshold: config.eviction_etx_threshold,
            unreachable_sh_etx_threshold: config.unreachable_sh_etx_threshold,
            entries: BTreeMap::new(),
            parent: None,
            multihop_etx: None,
            policy,
            rng: StdRng::seed_from_u64(seed),
        };
        table.reset();
        table
    }

    pub fn is_sink(&self) -> bool {
        self.node == self.sink
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn multihop_etx(&self) -> Option<f64> {
        self.multihop_etx
    }

    pub fn entry(&self, node: NodeId) -> Option<&RouteEntry> {
        self.entries.get(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// New single-hop ETX from the link estimator.
    pub fn update_sh_etx<S: StatsSink>(
        &mut self,
        stats: &mut S,
        neighbor: NodeId,
        sh_etx: f64,
        notices: &mut VecDeque<RouteNotice>,
    ) {
        if self.is_sink() {
            return;
        }
        table_log!(trace, self, "SH-ETX for node {}: {:.2}", neighbor, sh_etx);

        if let Some(entry) = self.entries.get_mut(&neighbor) {
            if sh_etx > self.unreachable_sh_etx_threshold {
                table_log!(debug, self, "Node {} unreachable (SH-ETX {:.2}), removing", neighbor, sh_etx);
                self.entries.remove(&neighbor);
                if self.parent == Some(neighbor) {
                    self.invalidate_parent(notices);
                    notices.push_back(RouteNotice::ResetTrickleAndPull);
                }
            } else {
                entry.sh_etx = Some(sh_etx);
            }
        } else if self.try_insert(neighbor, None, notices) {
            table_log!(debug, self, "New neighbor {} with SH-ETX {:.2}", neighbor, sh_etx);
            if let Some(entry) = self.entries.get_mut(&neighbor) {
                entry.sh_etx = Some(sh_etx);
            }
        }

        self.select_parent(stats, notices);
    }

    /// Route information a neighbor advertised in its beacon.
    pub fn update_remote<S: StatsSink>(
        &mut self,
        stats: &mut S,
        neighbor: NodeId,
        mh_etx: Option<f64>,
        parent: Option<NodeId>,
        notices: &mut VecDeque<RouteNotice>,
    ) {
        if self.is_sink() {
            table_log!(trace, self, "Sink ignores route info from {}", neighbor);
            return;
        }

        let known = self.entries.contains_key(&neighbor);
        if known || self.try_insert(neighbor, mh_etx, notices) {
            if let Some(entry) = self.entries.get_mut(&neighbor) {
                entry.mh_etx = mh_etx;
                entry.parent = parent;
            }
        }

        self.select_parent(stats, notices);
    }

    /// Battery chain from a neighbor's beacon. Never evicts to make room.
    pub fn update_battery_chain<S: StatsSink>(
        &mut self,
        stats: &mut S,
        neighbor: NodeId,
        chain: Vec<f64>,
        notices: &mut VecDeque<RouteNotice>,
    ) {
        if self.is_sink() || !P::CARRIES_BATTERY_CHAIN {
            return;
        }
        if !self.entries.contains_key(&neighbor) && self.entries.len() >= self.capacity {
            table_log!(trace, self, "Table full, not recording battery chain of {}", neighbor);
            return;
        }
        self.entries.entry(neighbor).or_default().battery_chain = chain;
        self.select_parent(stats, notices);
    }

    /// Energy loss.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.parent = None;
        self.multihop_etx = if self.is_sink() { Some(0.0) } else { None };
    }

    fn invalidate_parent(&mut self, notices: &mut VecDeque<RouteNotice>) {
        table_log!(debug, self, "Parent {:?} invalidated", self.parent);
        self.parent = None;
        self.multihop_etx = None;
        notices.push_back(RouteNotice::MultihopEtx(None));
        notices.push_back(RouteNotice::Route {
            parent: None,
            multihop_etx: None,
        });
        if P::CARRIES_BATTERY_CHAIN {
            notices.push_back(RouteNotice::ParentBatteryChain(Vec::new()));
        }
    }

    fn try_insert(&mut self, neighbor: NodeId, mh_etx: Option<f64>, notices: &mut VecDeque<RouteNotice>) -> bool {
        if self.entries.len() < self.capacity {
            self.entries.insert(neighbor, RouteEntry::default());
            return true;
        }
        let Some(victim) = self.eviction_victim(neighbor == self.sink, mh_etx) else {
            table_log!(trace, self, "Table full and nothing evictable, dropping node {}", neighbor);
            return false;
        };

        table_log!(debug, self, "Evicting node {} to make room for {}", victim, neighbor);
        self.entries.remove(&victim);
        if self.parent == Some(victim) {
            self.invalidate_parent(notices);
            notices.push_back(RouteNotice::ResetTrickleAndPull);
        }
        self.entries.insert(neighbor, RouteEntry::default());
        true
    }

    /// The sink is never a victim. `force` is set when inserting the sink.
    fn eviction_victim(&mut self, force: bool, candidate_mh: Option<f64>) -> Option<NodeId> {
        let sink = self.sink;
        let evictable = || self.entries.iter().filter(move |(id, _)| **id != sink);

        let worst_link = evictable()
            .filter_map(|(id, entry)| entry.sh_etx.map(|sh| (*id, sh)))
            .filter(|(_, sh)| *sh >= self.eviction_etx_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((victim, _)) = worst_link {
            return Some(victim);
        }

        let worse_route = evictable()
            .filter_map(|(id, entry)| entry.mh_etx.map(|mh| (*id, mh)))
            .filter(|(_, mh)| candidate_mh.map_or(true, |candidate| *mh > candidate))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((victim, _)) = worse_route {
            return Some(victim);
        }

        if !force {
            return None;
        }
        let ids: Vec<NodeId> = evictable().map(|(id, _)| *id).collect();
        if ids.is_empty() {
            return None;
        }
        let victim = ids[self.rng.random_range(0..ids.len())];
        table_log!(debug, self, "Forcing eviction of randomly chosen node {}", victim);
        Some(victim)
    }

    fn select_parent<S: StatsSink>(&mut self, stats: &mut S, notices: &mut VecDeque<RouteNotice>) {
        let node = self.node;
        let candidates: Vec<(NodeId, &RouteEntry)> = self
            .entries
            .iter()
            .filter(|(id, entry)| {
                entry.mh_etx.is_some()
                    && entry.sh_etx.is_some()
                    && Some(**id) != self.parent
                    && entry.parent != Some(node)
            })
            .map(|(id, entry)| (*id, entry))
            .collect();
        let current = self.parent.and_then(|parent| self.entries.get(&parent));
        let chosen = self.policy.choose(&candidates, current);

        let mut parent_changed = false;
        if let Some(new_parent) = chosen {
            if self.parent.is_some() || self.policy.counts_first_parent() {
                stats.count(P::TIMES_SWITCHED_PARENT);
            }
            table_log!(debug, self, "Parent {:?} -> {}", self.parent, new_parent);
            self.parent = Some(new_parent);
            parent_changed = true;
        }

        let mut mh_changed = false;
        if let Some(entry) = self.parent.and_then(|parent| self.entries.get(&parent)) {
            if P::CARRIES_BATTERY_CHAIN {
                notices.push_back(RouteNotice::ParentBatteryChain(entry.battery_chain.clone()));
            }
            let updated = entry.path_etx();
            if updated != self.multihop_etx {
                table_log!(
                    debug,
                    self,
                    "MH-ETX is parent's {:?} + SH-ETX {:?} = {:?}",
                    entry.mh_etx,
                    entry.sh_etx,
                    updated
                );
                if let Some(sh_etx) = entry.sh_etx {
                    stats.record(P::SH_ETX_TO_PARENT, sh_etx);
                }
                self.multihop_etx = updated;
                mh_changed = true;
            }
        }

        if mh_changed {
            notices.push_back(RouteNotice::MultihopEtx(self.multihop_etx));
            if let Some(mh_etx) = self.multihop_etx {
                stats.record(P::MH_ETX, mh_etx);
            }
        }
        if let (true, Some(parent)) = (parent_changed, self.parent) {
            notices.push_back(RouteNotice::NewParent(parent));
        }
        if mh_changed || parent_changed {
            notices.push_back(RouteNotice::Route {
                parent: self.parent,
                multihop_etx: self.multihop_etx,
            });
        }
    }
}
