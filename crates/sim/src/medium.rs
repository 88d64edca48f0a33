//! the shared channel: frames on air, carrier sense and collisions

use std::time::Duration;

use wsn_core::NodeId;
use wsn_mac::MacFrame;

use crate::topology::Topology;

#[derive(Debug, Clone)]
pub struct Transmission {
    pub id: u64,
    pub source: NodeId,
    pub start: Duration,
    pub end: Duration,
    pub frame: MacFrame,
    /// The transmitter lost power mid-frame.
    pub aborted: bool,
    finished: bool,
}

/// Frames currently on air, plus finished ones that may still overlap
/// something on air.
pub struct Medium {
    topology: Topology,
    on_air: Vec<Transmission>,
    next_id: u64,
}

impl Medium {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            on_air: Vec::new(),
            next_id: 0,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn start(&mut self, source: NodeId, frame: MacFrame, start: Duration, end: Duration) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        log::trace!("Node {} puts {} frame {} on air until {:?}", source, frame.kind, id, end);
        self.on_air.push(Transmission {
            id,
            source,
            start,
            end,
            frame,
            aborted: false,
            finished: false,
        });
        id
    }

    /// Whether any node in range of `node` is transmitting at `now`.
    pub fn is_busy_near(&self, node: NodeId, now: Duration) -> bool {
        self.on_air.iter().any(|tx| {
            !tx.finished && tx.start <= now && now < tx.end && self.topology.in_range(tx.source, node)
        })
    }

    /// Cuts short whatever `node` is sending.
    pub fn abort_from(&mut self, node: NodeId, now: Duration) {
        for tx in self.on_air.iter_mut().filter(|tx| tx.source == node && !tx.finished) {
            log::debug!("Node {} lost power mid-frame, frame {} cut short", node, tx.id);
            tx.aborted = true;
            tx.end = tx.end.min(now);
        }
    }

    /// Marks the frame finished and returns a copy of it.
    /// Pruning runs first, so everything overlapping this frame is kept
    /// for the collision checks that follow.
    pub fn finish(&mut self, id: u64, now: Duration) -> Option<Transmission> {
        self.prune(now);
        let tx = self.on_air.iter_mut().find(|tx| tx.id == id)?;
        tx.finished = true;
        Some(tx.clone())
    }

    /// Whether `receiver` heard another transmission overlapping `tx`, its own included.
    pub fn collided(&self, tx: &Transmission, receiver: NodeId) -> bool {
        self.on_air.iter().any(|other| {
            other.id != tx.id
                && (other.source == receiver || self.topology.in_range(other.source, receiver))
                && other.start < tx.end
                && other.end > tx.start
        })
    }

    pub fn on_air(&self) -> usize {
        self.on_air.iter().filter(|tx| !tx.finished).count()
    }

    fn prune(&mut self, now: Duration) {
        let horizon = self
            .on_air
            .iter()
            .filter(|tx| !tx.finished)
            .map(|tx| tx.start)
            .min()
            .unwrap_or(now);
        self.on_air.retain(|tx| !tx.finished || tx.end > horizon);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use wsn_core::Destination;

    use super::*;
    use crate::config::TopologyLayout;

    fn medium() -> Medium {
        // 0 - 1 - 2, where 0 and 2 are hidden from each other
        Medium::new(Topology::from_layout(&TopologyLayout::Line { nodes: 3, loss: 0.0 }).unwrap())
    }

    fn frame(source: NodeId) -> MacFrame {
        MacFrame::data(source, Destination::Broadcast, Bytes::new(), 100)
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_carrier_sense_is_local() {
        let mut medium = medium();
        let id = medium.start(0, frame(0), ms(0), ms(4));
        assert!(medium.is_busy_near(1, ms(2)));
        assert!(!medium.is_busy_near(2, ms(2)));
        assert!(!medium.is_busy_near(1, ms(4)));

        medium.finish(id, ms(4));
        assert!(!medium.is_busy_near(1, ms(3)));
        assert_eq!(medium.on_air(), 0);
    }

    #[test]
    fn test_hidden_terminals_collide_at_the_middle() {
        let mut medium = medium();
        let a = medium.start(0, frame(0), ms(0), ms(4));
        let _b = medium.start(2, frame(2), ms(2), ms(6));

        let tx = medium.finish(a, ms(4)).unwrap();
        assert!(medium.collided(&tx, 1));
        // node 0 cannot hear node 2
        assert!(!medium.collided(&tx, 0));
    }

    #[test]
    fn test_finished_frame_still_counts_for_later_overlap() {
        let mut medium = medium();
        let a = medium.start(0, frame(0), ms(0), ms(4));
        let b = medium.start(2, frame(2), ms(3), ms(8));
        medium.finish(a, ms(4));

        let tx = medium.finish(b, ms(8)).unwrap();
        assert!(medium.collided(&tx, 1));
    }

    #[test]
    fn test_back_to_back_frames_do_not_collide() {
        let mut medium = medium();
        let a = medium.start(0, frame(0), ms(0), ms(4));
        medium.finish(a, ms(4));
        let b = medium.start(2, frame(2), ms(4), ms(8));
        let tx = medium.finish(b, ms(8)).unwrap();
        assert!(!medium.collided(&tx, 1));
    }

    #[test]
    fn test_abort_cuts_frame() {
        let mut medium = medium();
        let a = medium.start(1, frame(1), ms(0), ms(10));
        medium.abort_from(1, ms(3));
        assert!(!medium.is_busy_near(0, ms(5)));
        let tx = medium.finish(a, ms(10)).unwrap();
        assert!(tx.aborted);
        assert_eq!(tx.end, ms(3));
    }
}
