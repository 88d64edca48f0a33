//! parent selection rules for the collection tree

use wsn_core::NodeId;

use crate::table::RouteEntry;

/// How a node picks its parent among eligible neighbors.
///
/// Eligibility is decided by the table: a candidate has a valid SH-ETX and
/// MH-ETX, is not the current parent and does not route through us.
pub trait ParentPolicy {
    /// Log tag and stats prefix.
    const NAME: &'static str;
    const SH_ETX_TO_PARENT: &'static str;
    const MH_ETX: &'static str;
    const TIMES_SWITCHED_PARENT: &'static str;
    /// Whether beacons and table entries carry the battery chain.
    const CARRIES_BATTERY_CHAIN: bool;

    /// Returns the neighbor to switch to, if any. `current` is the entry of
    /// the current parent.
    fn choose(&self, candidates: &[(NodeId, &RouteEntry)], current: Option<&RouteEntry>) -> Option<NodeId>;

    /// Whether adopting a first parent counts as a switch.
    fn counts_first_parent(&self) -> bool;
}

/// CTP: lowest path ETX, with hysteresis on the parent's MH-ETX.
#[derive(Debug, Clone)]
pub struct CtpPolicy {
    pub switch_margin: f64,
}

impl ParentPolicy for CtpPolicy {
    const NAME: &'static str = "CtpRouting";
    const SH_ETX_TO_PARENT: &'static str = "CtpRouting SH-ETX to parent";
    const MH_ETX: &'static str = "CtpRouting MH-ETX";
    const TIMES_SWITCHED_PARENT: &'static str = "CtpRouting Times switched parent";
    const CARRIES_BATTERY_CHAIN: bool = false;

    fn choose(&self, candidates: &[(NodeId, &RouteEntry)], current: Option<&RouteEntry>) -> Option<NodeId> {
        let (best, entry) = candidates
            .iter()
            .filter_map(|(id, entry)| entry.path_etx().map(|path| (*id, *entry, path)))
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(id, entry, _)| (id, entry))?;

        let Some(current) = current else {
            return Some(best);
        };
        // A parent that lost its own route is always worth leaving
        let Some(current_mh) = current.mh_etx else {
            return Some(best);
        };
        let best_mh = entry.mh_etx?;
        (best_mh + self.switch_margin < current_mh).then_some(best)
    }

    fn counts_first_parent(&self) -> bool {
        false
    }
}

/// MMBCR: favours paths whose weakest node has the most battery left,
/// blended with the reciprocal of the path MH-ETX.
#[derive(Debug, Clone)]
pub struct MmbcrPolicy {
    pub weighting_mmbcr: f64,
    pub weighting_mh_etx: f64,
    pub switch_threshold: f64,
}

impl MmbcrPolicy {
    /// Higher is better. An empty chain belongs to the sink and scores best.
    pub fn metric(&self, entry: &RouteEntry) -> f64 {
        let battery = entry
            .battery_chain
            .iter()
            .copied()
            .min_by(f64::total_cmp)
            .unwrap_or(1.0);
        let mh_etx = match entry.mh_etx {
            Some(mh) if mh == 0.0 => 1.0,
            Some(mh) => 1.0 / mh,
            None => 0.0,
        };
        battery * self.weighting_mmbcr + mh_etx * self.weighting_mh_etx
    }
}

impl ParentPolicy for MmbcrPolicy {
    const NAME: &'static str = "Mmbcr";
    const SH_ETX_TO_PARENT: &'static str = "Mmbcr SH-ETX to parent";
    const MH_ETX: &'static str = "Mmbcr MH-ETX";
    const TIMES_SWITCHED_PARENT: &'static str = "Mmbcr Times switched parent";
    const CARRIES_BATTERY_CHAIN: bool = true;

    fn choose(&self, candidates: &[(NodeId, &RouteEntry)], current: Option<&RouteEntry>) -> Option<NodeId> {
        let (best, best_metric) = candidates
            .iter()
            .map(|(id, entry)| (*id, self.metric(entry)))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        match current {
            None => Some(best),
            // recomputed every pass, the parent's chain changes with its beacons
            Some(current) => (best_metric >= self.metric(current) + self.switch_threshold).then_some(best),
        }
    }

    fn counts_first_parent(&self) -> bool {
        true
    }
}
