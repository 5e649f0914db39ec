//! Topology builders.
//!
//! Each builder returns fully formed components and can be used on its own:
//! - `build_nodes`: mesh nodes plus the monitor, with their mobility models
//! - `install_wireless_devices`: one wireless device per node, `10.1.1.0/24`
//! - `install_monitor_links`: a point-to-point link from every node to the monitor, `10.2.k.0/24`
//! - `install_applications`: sinks and on/off sources, bound and scheduled

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use std::net::{Ipv4Addr, SocketAddrV4};

use super::application::{EPHEMERAL_PORT_BASE, OnOffConfig, OnOffSource, PacketSink};
use super::channel::{LinkParameters, PointToPointLink};
use super::clock::SimTime;
use super::derive_seed;
use super::events::SimEvent;
use super::geometry::Point;
use super::mobility::{ConstantPosition, MobilityModel, RandomWalk2d};
use super::network::Network;
use super::scheduler::Scheduler;
use super::types::{Device, DeviceKind, Node, NodeId};
use crate::common::scenario::{MobilityKind, Placement, Scenario};
use crate::error::{SimError, SimResult};

const PLACEMENT_SALT: u64 = 0x504c_4143;
const WALK_SALT: u64 = 0x5741_4c4b_0000;

/// Nodes, devices and links before they are assembled into a `Network`.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub nodes: Vec<Node>,
    pub devices: Vec<Device>,
    pub links: Vec<PointToPointLink>,
}

/// Build the full topology described by a scenario.
pub fn build_topology(scenario: &Scenario) -> Topology {
    let mut nodes = build_nodes(scenario);
    let mesh_count = scenario.mesh.node_count.min(nodes.len());
    let mut devices = install_wireless_devices(&mut nodes[..mesh_count]);
    let links = match scenario.monitor_id() {
        Some(monitor) => install_monitor_links(&mut nodes, &mut devices, monitor, &scenario.monitor.link),
        None => Vec::new(),
    };
    Topology { nodes, devices, links }
}

fn start_positions(scenario: &Scenario) -> Vec<Point> {
    let field = scenario.field;
    let n = scenario.mesh.node_count;
    if let Some(positions) = &scenario.mesh.positions {
        return positions.clone();
    }
    match scenario.mesh.placement {
        Placement::Origin => vec![field.clamp(Point::ORIGIN); n],
        Placement::Uniform => {
            let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(scenario.seed, PLACEMENT_SALT));
            let xs = Uniform::new_inclusive(field.min_x, field.max_x);
            let ys = Uniform::new_inclusive(field.min_y, field.max_y);
            (0..n).map(|_| Point::new(xs.sample(&mut rng), ys.sample(&mut rng))).collect()
        }
    }
}

/// Create the mesh nodes (ids `0..node_count`) and, when enabled, the monitor (id `node_count`).
pub fn build_nodes(scenario: &Scenario) -> Vec<Node> {
    let mesh = &scenario.mesh;
    let interval = SimTime::from_secs_f64(mesh.direction_change_s);
    let mut nodes: Vec<Node> = start_positions(scenario)
        .into_iter()
        .enumerate()
        .map(|(i, start)| {
            let mobility = match mesh.mobility {
                MobilityKind::RandomWalk => MobilityModel::RandomWalk(RandomWalk2d::new(
                    scenario.field,
                    mesh.speed_min_mps,
                    mesh.speed_max_mps,
                    interval,
                    start,
                    derive_seed(scenario.seed, WALK_SALT + i as u64),
                )),
                MobilityKind::Static => MobilityModel::Constant(ConstantPosition::new(start)),
            };
            Node {
                id: i as NodeId,
                name: format!("mesh-{}", i),
                mobility,
                devices: Vec::new(),
            }
        })
        .collect();

    if let Some(id) = scenario.monitor_id() {
        nodes.push(Node {
            id,
            name: "monitor".to_string(),
            mobility: MobilityModel::Constant(ConstantPosition::new(scenario.monitor.position)),
            devices: Vec::new(),
        });
    }
    nodes
}

/// Install one wireless device per node. Node `i` of the slice gets `10.1.1.(i+1)`.
///
/// Device ids start at 0, so call this before any other installer.
pub fn install_wireless_devices(nodes: &mut [Node]) -> Vec<Device> {
    nodes
        .iter_mut()
        .enumerate()
        .map(|(i, node)| {
            node.devices.push(i);
            Device {
                id: i,
                node: node.id,
                kind: DeviceKind::Wireless,
                address: Ipv4Addr::new(10, 1, 1, (i + 1) as u8),
                up: true,
            }
        })
        .collect()
}

/// Wire every node except the monitor to the monitor. Link `k` uses
/// `10.2.(k+1).1` on the node side and `10.2.(k+1).2` on the monitor side.
pub fn install_monitor_links(nodes: &mut [Node], devices: &mut Vec<Device>, monitor: NodeId, params: &LinkParameters) -> Vec<PointToPointLink> {
    let Some(monitor_index) = nodes.iter().position(|n| n.id == monitor) else {
        log::warn!("monitor node {} not found, no point-to-point links installed", monitor);
        return Vec::new();
    };
    let mut links = Vec::new();
    for index in 0..nodes.len() {
        if index == monitor_index {
            continue;
        }
        let link = links.len();
        let subnet = (link + 1) as u8;
        let near = devices.len();
        let far = near + 1;
        devices.push(Device {
            id: near,
            node: nodes[index].id,
            kind: DeviceKind::PointToPoint { link },
            address: Ipv4Addr::new(10, 2, subnet, 1),
            up: true,
        });
        devices.push(Device {
            id: far,
            node: monitor,
            kind: DeviceKind::PointToPoint { link },
            address: Ipv4Addr::new(10, 2, subnet, 2),
            up: true,
        });
        nodes[index].devices.push(near);
        nodes[monitor_index].devices.push(far);
        links.push(PointToPointLink::new(link, [near, far], params));
    }
    links
}

fn add_sink(
    sinks: &mut Vec<PacketSink>,
    network: &mut Network,
    scheduler: &mut Scheduler<SimEvent>,
    node: NodeId,
    port: u16,
    stop: Option<SimTime>,
) -> SimResult<()> {
    let sink = PacketSink::new(sinks.len(), node, port, stop);
    network.bind(node, port, sink.id)?;
    sink.install(scheduler)?;
    sinks.push(sink);
    Ok(())
}

/// Install sinks and sources, bind the sinks' ports and schedule every application event.
///
/// Mesh node `i` gets a sink on its default port that stops with the traffic;
/// the monitor's sink listens for the whole run. A flow towards a port nobody
/// listens on gets a sink of its own.
pub fn install_applications(
    scenario: &Scenario,
    network: &mut Network,
    scheduler: &mut Scheduler<SimEvent>,
) -> SimResult<(Vec<OnOffSource>, Vec<PacketSink>)> {
    let mut sinks: Vec<PacketSink> = Vec::new();

    for node in 0..scenario.mesh.node_count as NodeId {
        add_sink(&mut sinks, network, scheduler, node, scenario.default_port(node), Some(scenario.duration()))?;
    }
    if let Some(monitor) = scenario.monitor_id() {
        add_sink(&mut sinks, network, scheduler, monitor, scenario.monitor.sink_port, None)?;
    }

    let mut next_port = vec![EPHEMERAL_PORT_BASE; network.nodes().len()];
    let mut sources = Vec::new();
    for plan in scenario.flow_plans() {
        if network.bound_sink(plan.destination, plan.port).is_none() {
            add_sink(&mut sinks, network, scheduler, plan.destination, plan.port, None)?;
        }

        let (device, remote) = network
            .route(plan.source, plan.destination)
            .ok_or_else(|| SimError::config(format!("no route from node {} to node {}", plan.source, plan.destination)))?;
        let address = network
            .device(device)
            .map(|d| d.address)
            .ok_or_else(|| SimError::config(format!("route uses unknown device {}", device)))?;

        let slot = next_port
            .get_mut(plan.source as usize)
            .ok_or_else(|| SimError::config(format!("flow source {} is not a node", plan.source)))?;
        let local_port = *slot;
        *slot = slot
            .checked_add(1)
            .ok_or_else(|| SimError::config(format!("node {} ran out of ephemeral ports", plan.source)))?;

        let source = OnOffSource::new(
            sources.len(),
            OnOffConfig {
                node: plan.source,
                device,
                local: SocketAddrV4::new(address, local_port),
                remote: SocketAddrV4::new(remote, plan.port),
                rate_bps: plan.rate_bps,
                packet_size: plan.packet_size,
                start: plan.start(),
                stop: plan.stop(),
                on_time: plan.on_time(),
                off_time: plan.off_time(),
            },
        );
        source.install(scheduler)?;
        sources.push(source);
    }

    log::info!("Installed {} sources and {} sinks", sources.len(), sinks.len());
    Ok((sources, sinks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::mac::MacParameters;
    use crate::simulation::mobility::Mobility;
    use crate::simulation::signal_calculations::PhyParameters;
    use crate::simulation::types::LinkKind;

    #[test]
    fn reference_topology_layout() {
        let scenario = Scenario::default();
        let topology = build_topology(&scenario);
        assert_eq!(topology.nodes.len(), 11);
        assert_eq!(topology.links.len(), 10);
        // 10 wireless + 2 per link.
        assert_eq!(topology.devices.len(), 30);
        let monitor = &topology.nodes[10];
        assert_eq!(monitor.name, "monitor");
        assert_eq!(monitor.devices.len(), 10);
        assert!(topology.nodes[..10].iter().all(|n| n.devices.len() == 2));
        assert_eq!(topology.devices[9].address, Ipv4Addr::new(10, 1, 1, 10));
        assert_eq!(topology.devices[10].address, Ipv4Addr::new(10, 2, 1, 1));
        assert_eq!(topology.devices[11].address, Ipv4Addr::new(10, 2, 1, 2));
        assert_eq!(topology.devices[11].node, 10);
        // All mesh nodes start at the origin.
        assert!(topology.nodes.iter().all(|n| n.mobility.position_at(SimTime::ZERO) == Point::ORIGIN));
    }

    #[test]
    fn uniform_placement_is_seeded() {
        let mut scenario = Scenario::default();
        scenario.mesh.placement = Placement::Uniform;
        let a: Vec<Point> = build_nodes(&scenario).iter().map(|n| n.mobility.position_at(SimTime::ZERO)).collect();
        let b: Vec<Point> = build_nodes(&scenario).iter().map(|n| n.mobility.position_at(SimTime::ZERO)).collect();
        assert_eq!(a, b);
        assert!(a[..10].iter().all(|p| scenario.field.contains(p)));
        assert_ne!(a[0], a[1]);
    }

    #[test]
    fn monitor_can_be_disabled() {
        let mut scenario = Scenario::default();
        scenario.monitor.enabled = false;
        let topology = build_topology(&scenario);
        assert_eq!(topology.nodes.len(), 10);
        assert!(topology.links.is_empty());
        assert!(topology.devices.iter().all(|d| d.kind.link_kind() == LinkKind::Wireless));
    }

    #[test]
    fn applications_for_reference_scenario() {
        let scenario = Scenario::default();
        let mut network =
            Network::new(build_topology(&scenario), PhyParameters::default(), MacParameters::default(), scenario.seed).unwrap();
        let mut scheduler = Scheduler::new();
        let (sources, sinks) = install_applications(&scenario, &mut network, &mut scheduler).unwrap();
        assert_eq!(sources.len(), 90);
        assert_eq!(sinks.len(), 11);
        assert_eq!(sinks[10].port, 9999);
        // Mesh-to-mesh traffic goes over the air to port 9 + j.
        let first = sources[0].config();
        assert_eq!(first.remote, SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 10));
        assert_eq!(first.local, SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), EPHEMERAL_PORT_BASE));
        assert_eq!(sources[1].config().local.port(), EPHEMERAL_PORT_BASE + 1);
        // Start + stop per source, stop per mesh sink.
        assert_eq!(scheduler.len(), 90 * 2 + 10);
    }
}
