//! Simulation scenarios: every MAC and routing combination on one driver

use std::time::Duration;

use anyhow::Context;
use wsn_core::NodeId;
use wsn_mac::{BoxMac, MacProtocol, RicerMac};
use wsn_routing::{CtpRouting, MmbcrRouting, RoutingNode, RoutingProtocol, StaticRouting};

use crate::config::{MacChoice, RoutingChoice, SimConfig};
use crate::report::SimReport;
use crate::simulation::Simulation;
use crate::SimError;

type Build<T> = fn(&SimConfig, NodeId) -> Result<T, SimError>;

/// Distinct per node and per layer, fixed by the run seed.
fn node_seed(config: &SimConfig, node: NodeId, layer: u64) -> u64 {
    config
        .seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add((layer << 32) | node as u64)
}

fn ricer(config: &SimConfig, node: NodeId) -> Result<RicerMac, SimError> {
    RicerMac::new(config.ricer_for(node), node_seed(config, node, 1)).map_err(|source| SimError::Mac { node, source })
}

fn boxmac(config: &SimConfig, node: NodeId) -> Result<BoxMac, SimError> {
    Ok(BoxMac::new(config.boxmac_for(node), node_seed(config, node, 1)))
}

fn ctp(config: &SimConfig, node: NodeId) -> Result<CtpRouting, SimError> {
    Ok(RoutingNode::ctp(config.routing_for(node), node_seed(config, node, 2)))
}

fn mmbcr(config: &SimConfig, node: NodeId) -> Result<MmbcrRouting, SimError> {
    Ok(RoutingNode::mmbcr(config.routing_for(node), node_seed(config, node, 2)))
}

fn static_routing(config: &SimConfig, node: NodeId) -> Result<StaticRouting, SimError> {
    Ok(StaticRouting::new(config.routing_for(node)))
}

fn run_stack<M, R, P>(config: SimConfig, mac: Build<M>, routing: Build<R>, progress: P) -> Result<SimReport, SimError>
where
    M: MacProtocol,
    R: RoutingProtocol,
    P: FnMut(Duration),
{
    let template = config.clone();
    let simulation = Simulation::new(config, |node| Ok((mac(&template, node)?, routing(&template, node)?)))?;
    simulation.run_with_progress(progress)
}

pub fn run_simulation(config: SimConfig) -> anyhow::Result<SimReport> {
    run_with_progress(config, |_| {})
}

pub fn run_with_progress<P: FnMut(Duration)>(config: SimConfig, progress: P) -> anyhow::Result<SimReport> {
    let (mac, routing) = (config.mac, config.routing);
    log::info!(
        "Starting {:?} + {:?} on {} nodes for {:?} (seed {})",
        mac,
        routing,
        config.node_count(),
        config.duration,
        config.seed
    );
    let report = match (mac, routing) {
        (MacChoice::Ricer, RoutingChoice::Ctp) => run_stack(config, ricer, ctp, progress),
        (MacChoice::Ricer, RoutingChoice::Mmbcr) => run_stack(config, ricer, mmbcr, progress),
        (MacChoice::Ricer, RoutingChoice::Static) => run_stack(config, ricer, static_routing, progress),
        (MacChoice::BoxMac, RoutingChoice::Ctp) => run_stack(config, boxmac, ctp, progress),
        (MacChoice::BoxMac, RoutingChoice::Mmbcr) => run_stack(config, boxmac, mmbcr, progress),
        (MacChoice::BoxMac, RoutingChoice::Static) => run_stack(config, boxmac, static_routing, progress),
    }
    .with_context(|| format!("{:?} + {:?} simulation aborted", mac, routing))?;
    log::info!(
        "{:?} + {:?} finished: {}/{} packets delivered",
        mac,
        routing,
        report.delivered,
        report.generated
    );
    Ok(report)
}

/// Runs on the blocking pool so several scenarios can share one runtime.
pub async fn run_in_background(config: SimConfig) -> anyhow::Result<SimReport> {
    tokio::task::spawn_blocking(move || run_simulation(config)).await?
}
