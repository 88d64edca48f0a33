//! discrete-event driver: a medium, a clock and one supervisor per node

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use wsn_core::{ArmedTimer, Destination, NodeId, Stats, StatsSink};
use wsn_mac::MacProtocol;
use wsn_routing::{RoutingProtocol, RoutingTimer};

use crate::config::{PowerAction, PowerEvent, SimConfig};
use crate::event::EventQueue;
use crate::medium::Medium;
use crate::node::{application_payload, Node};
use crate::report::{NodeReport, SimReport};
use crate::topology::Topology;
use crate::SimError;

/// Nodes power up within this window, so they do not wake in lockstep.
const BOOT_JITTER_MICROS: u64 = 1_000;

#[derive(Debug)]
enum Event<K> {
    MacTimer(NodeId, ArmedTimer<K>),
    RoutingTimer(NodeId, ArmedTimer<RoutingTimer>),
    TxEnd(NodeId, u64),
    Generate(NodeId),
    Power(PowerEvent),
}

pub struct Simulation<M: MacProtocol, R: RoutingProtocol> {
    config: SimConfig,
    nodes: Vec<Node<M, R>>,
    medium: Medium,
    queue: EventQueue<Event<M::Timer>>,
    rng: StdRng,
    interarrival: Exp<f64>,
    channel: Stats,
    events: u64,
}

impl<M: MacProtocol, R: RoutingProtocol> Simulation<M, R> {
    /// `build` creates the MAC and routing instance for each node id.
    pub fn new<F>(config: SimConfig, mut build: F) -> Result<Self, SimError>
    where
        F: FnMut(NodeId) -> Result<(M, R), SimError>,
    {
        let topology = Topology::from_layout(&config.topology)?;
        if topology.node_count() == 0 {
            return Err(SimError::InvalidConfig("topology has no nodes".to_string()));
        }
        if config.sink as usize >= topology.node_count() {
            return Err(SimError::InvalidConfig(format!(
                "sink {} outside of {} nodes",
                config.sink,
                topology.node_count()
            )));
        }
        if config.traffic.mean_interval.is_zero() {
            return Err(SimError::InvalidConfig("traffic interval must be greater than zero".to_string()));
        }
        let rate = 1.0 / config.traffic.mean_interval.as_secs_f64();
        let interarrival = Exp::new(rate)
            .map_err(|e| SimError::InvalidConfig(format!("traffic interval {:?}: {}", config.traffic.mean_interval, e)))?;

        let mut nodes = Vec::with_capacity(topology.node_count());
        for id in topology.nodes() {
            let (mac, routing) = build(id)?;
            nodes.push(Node::new(
                mac,
                routing,
                config.channel.cca_settle,
                config.battery_drain_per_frame,
            ));
        }

        let mut simulation = Self {
            rng: StdRng::seed_from_u64(config.seed),
            medium: Medium::new(topology),
            queue: EventQueue::new(),
            nodes,
            interarrival,
            channel: Stats::new(),
            events: 0,
            config,
        };
        simulation.schedule_initial_events();
        Ok(simulation)
    }

    fn schedule_initial_events(&mut self) {
        for node in self.medium.topology().nodes() {
            let at = Duration::from_micros(self.rng.random_range(0..BOOT_JITTER_MICROS));
            self.queue.schedule(
                at,
                Event::Power(PowerEvent {
                    at,
                    node,
                    action: PowerAction::Restore,
                }),
            );
        }
        for event in self.config.power_schedule.clone() {
            self.queue.schedule(event.at, Event::Power(event));
        }
        for node in self.medium.topology().nodes() {
            if node != self.config.sink {
                let at = self.config.traffic.start_after + self.next_interarrival();
                self.queue.schedule(at, Event::Generate(node));
            }
        }
    }

    fn next_interarrival(&mut self) -> Duration {
        Duration::from_secs_f64(self.interarrival.sample(&mut self.rng))
    }

    pub fn now(&self) -> Duration {
        self.queue.now()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<M, R>> {
        self.nodes.get(id as usize)
    }

    /// Processes one event. Returns false once the run is over.
    pub fn step(&mut self) -> Result<bool, SimError> {
        match self.queue.peek_time() {
            Some(at) if at <= self.config.duration => {}
            _ => return Ok(false),
        }
        let Some((now, event)) = self.queue.pop() else {
            return Ok(false);
        };
        self.events += 1;

        match event {
            Event::MacTimer(node, armed) => {
                self.prepare(node, now);
                self.nodes[node as usize].on_mac_timer(&armed)?;
                self.settle(node, now);
            }
            Event::RoutingTimer(node, armed) => {
                self.prepare(node, now);
                self.nodes[node as usize].on_routing_timer(&armed)?;
                self.settle(node, now);
            }
            Event::TxEnd(node, id) => self.end_transmission(node, id, now)?,
            Event::Generate(node) => {
                if self.nodes[node as usize].is_powered() {
                    let payload = application_payload(now, self.config.traffic.payload_bytes);
                    self.prepare(node, now);
                    self.nodes[node as usize].app_send(payload, Destination::Node(self.config.sink))?;
                    self.settle(node, now);
                }
                let next = now + self.next_interarrival();
                self.queue.schedule(next, Event::Generate(node));
            }
            Event::Power(event) => {
                self.prepare(event.node, now);
                match event.action {
                    PowerAction::Restore => self.nodes[event.node as usize].power_restore()?,
                    PowerAction::Loss => {
                        self.nodes[event.node as usize].power_loss();
                        self.medium.abort_from(event.node, now);
                    }
                }
                self.settle(event.node, now);
            }
        }
        Ok(true)
    }

    /// Moves the node's clock to `now` and lets it sense the channel.
    fn prepare(&mut self, node: NodeId, now: Duration) {
        let busy = self.medium.is_busy_near(node, now);
        self.nodes[node as usize].prepare(now, busy);
    }

    /// Schedules whatever the last handler armed or put on air.
    fn settle(&mut self, node: NodeId, now: Duration) {
        let (mac_timers, routing_timers) = self.nodes[node as usize].take_armed();
        for armed in mac_timers {
            self.queue.schedule(armed.deadline, Event::MacTimer(node, armed));
        }
        for armed in routing_timers {
            self.queue.schedule(armed.deadline, Event::RoutingTimer(node, armed));
        }
        while let Some(frame) = self.nodes[node as usize].take_outbox() {
            let end = now + self.config.channel.airtime(frame.bits);
            let id = self.medium.start(node, frame, now, end);
            self.nodes[node as usize].set_transmission(id);
            self.queue.schedule(end, Event::TxEnd(node, id));
        }
    }

    fn end_transmission(&mut self, source: NodeId, id: u64, now: Duration) -> Result<(), SimError> {
        let Some(tx) = self.medium.finish(id, now) else {
            return Ok(());
        };
        self.prepare(source, now);
        self.nodes[source as usize].on_tx_complete(id);
        if tx.aborted {
            self.channel.count("Channel frames aborted");
            return Ok(());
        }

        let neighbors: Vec<NodeId> = self.medium.topology().neighbors(source).collect();
        for receiver in neighbors {
            let listening = {
                let node = &self.nodes[receiver as usize];
                node.is_powered() && node.io().listening_since(tx.start)
            };
            if !listening {
                continue;
            }
            if self.medium.collided(&tx, receiver) {
                log::debug!("Frame {} from node {} collided at node {}", id, source, receiver);
                self.channel.count("Channel collisions");
                continue;
            }
            let loss = self.medium.topology().loss(source, receiver).unwrap_or(1.0);
            if self.rng.random::<f64>() < loss {
                self.channel.count("Channel frames lost");
                continue;
            }
            self.channel.count("Channel frames received");
            self.prepare(receiver, now);
            self.nodes[receiver as usize].on_frame(tx.frame.clone())?;
            self.settle(receiver, now);
        }
        Ok(())
    }

    pub fn run(self) -> Result<SimReport, SimError> {
        self.run_with_progress(|_| {})
    }

    /// Runs to the end, calling `progress` each time a simulated second passes.
    pub fn run_with_progress<F: FnMut(Duration)>(mut self, mut progress: F) -> Result<SimReport, SimError> {
        let mut last_second = 0;
        while self.step()? {
            let second = self.now().as_secs();
            if second != last_second {
                last_second = second;
                progress(self.now());
            }
        }
        progress(self.config.duration);
        Ok(self.finish())
    }

    fn finish(mut self) -> SimReport {
        for node in &mut self.nodes {
            node.finish();
        }
        let per_node: Vec<NodeReport> = self
            .nodes
            .iter()
            .map(|node| NodeReport {
                node: node.id(),
                powered: node.is_powered(),
                battery: node.io().battery_fraction(),
                stats: node.stats().clone(),
            })
            .collect();
        SimReport::new(&self.config, self.events, &self.channel, per_node)
    }
}
