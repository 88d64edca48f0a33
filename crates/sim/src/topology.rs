//! who hears whom, and how reliably

use std::collections::BTreeMap;

use wsn_core::NodeId;

use crate::config::TopologyLayout;
use crate::SimError;

#[derive(Debug, Clone)]
pub struct Topology {
    node_count: usize,
    /// Receiver -> loss probability, per transmitter.
    links: BTreeMap<NodeId, BTreeMap<NodeId, f64>>,
}

impl Topology {
    pub fn from_layout(layout: &TopologyLayout) -> Result<Self, SimError> {
        let mut topology = Self {
            node_count: layout.node_count(),
            links: BTreeMap::new(),
        };
        match layout {
            TopologyLayout::UnitDisk { positions, range, loss } => {
                for (a, pa) in positions.iter().enumerate() {
                    for (b, pb) in positions.iter().enumerate().skip(a + 1) {
                        let distance = ((pa.0 - pb.0).powi(2) + (pa.1 - pb.1).powi(2)).sqrt();
                        if distance <= *range {
                            topology.connect(a as NodeId, b as NodeId, *loss)?;
                        }
                    }
                }
            }
            TopologyLayout::Line { nodes, loss } => {
                for node in 1..*nodes {
                    topology.connect(node as NodeId - 1, node as NodeId, *loss)?;
                }
            }
            TopologyLayout::Links { links, .. } => {
                for link in links {
                    topology.connect(link.from, link.to, link.loss)?;
                }
            }
        }
        Ok(topology)
    }

    fn connect(&mut self, a: NodeId, b: NodeId, loss: f64) -> Result<(), SimError> {
        let count = self.node_count as NodeId;
        if a >= count || b >= count || a == b {
            return Err(SimError::InvalidTopology(format!("bad link {} <-> {}", a, b)));
        }
        if !(0.0..=1.0).contains(&loss) {
            return Err(SimError::InvalidTopology(format!("loss {} on link {} <-> {}", loss, a, b)));
        }
        self.links.entry(a).or_default().insert(b, loss);
        self.links.entry(b).or_default().insert(a, loss);
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        0..self.node_count as NodeId
    }

    /// Nodes in range of `node`, in id order.
    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.links.get(&node).into_iter().flat_map(|links| links.keys().copied())
    }

    pub fn loss(&self, from: NodeId, to: NodeId) -> Option<f64> {
        self.links.get(&from).and_then(|links| links.get(&to)).copied()
    }

    pub fn in_range(&self, a: NodeId, b: NodeId) -> bool {
        self.loss(a, b).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;

    #[test]
    fn test_unit_disk_connects_within_range() {
        let layout = TopologyLayout::UnitDisk {
            positions: vec![(0.0, 0.0), (8.0, 0.0), (16.0, 0.0)],
            range: 10.0,
            loss: 0.1,
        };
        let topology = Topology::from_layout(&layout).unwrap();
        assert!(topology.in_range(0, 1));
        assert!(topology.in_range(2, 1));
        assert!(!topology.in_range(0, 2));
        assert_eq!(topology.neighbors(1).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(topology.loss(1, 0), Some(0.1));
    }

    #[test]
    fn test_line() {
        let topology = Topology::from_layout(&TopologyLayout::Line { nodes: 3, loss: 0.0 }).unwrap();
        assert_eq!(topology.neighbors(0).collect::<Vec<_>>(), vec![1]);
        assert_eq!(topology.neighbors(1).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(topology.nodes().count(), 3);
    }

    #[test]
    fn test_bad_links_are_rejected() {
        let layout = TopologyLayout::Links {
            nodes: 2,
            links: vec![LinkConfig { from: 0, to: 4, loss: 0.0 }],
        };
        assert!(matches!(Topology::from_layout(&layout), Err(SimError::InvalidTopology(_))));

        let layout = TopologyLayout::Links {
            nodes: 2,
            links: vec![LinkConfig { from: 0, to: 1, loss: 1.5 }],
        };
        assert!(Topology::from_layout(&layout).is_err());
    }
}
