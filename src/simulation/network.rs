//! Addressing, routing and packet delivery.
//!
//! `Network` owns the nodes, their devices, the wireless channel, the
//! point-to-point links and one CSMA MAC per wireless device. It is the only
//! place that writes packet records: every datagram handed to [`Network::send`]
//! ends in exactly one Delivered, Dropped or Collided record.
//!
//! ## Wireless path
//!
//! 1. `send` queues the frame in the device MAC (`attempt_transmit`).
//! 2. `on_mac_access` senses the medium and transmits or backs off.
//! 3. A transmission evaluates the link budget to the destination node once,
//!    at the start of the frame, and schedules `RxEnd` when the last bit
//!    arrives.
//! 4. `on_rx_end` checks for overlapping frames, tells the sender's MAC
//!    whether its frame collided and hands the packet to the sink bound on
//!    the destination port.
//!
//! Each wireless device has at most one `MacAccess` event in flight. Its
//! handle is kept so that taking the device down cancels it.
//!
//! ## Point-to-point path
//!
//! The link serializes the frame and schedules `LinkArrival` on the peer.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::{Ipv4Addr, SocketAddrV4};

use super::channel::{PointToPointLink, Reception, WirelessChannel};
use super::clock::SimTime;
use super::events::{PendingReception, SimEvent};
use super::geometry::Point;
use super::mac::{CsmaMac, MacAction, MacParameters, MacState};
use super::mobility::Mobility;
use super::scheduler::{EventHandle, Scheduler};
use super::signal_calculations::{PhyParameters, calculate_air_time};
use super::topology::Topology;
use super::trace::{DropReason, PacketOutcome, PacketRecord, TraceLog};
use super::types::{Device, DeviceId, DeviceKind, LinkKind, Node, NodeId, Packet, PacketId, SinkId};
use super::derive_seed;
use crate::error::{SimError, SimResult};

pub struct Network {
    nodes: Vec<Node>,
    devices: Vec<Device>,
    links: Vec<PointToPointLink>,
    channel: WirelessChannel,
    macs: Vec<Option<CsmaMac>>,
    pending_access: Vec<Option<EventHandle>>,
    addresses: HashMap<Ipv4Addr, DeviceId>,
    bindings: HashMap<(NodeId, u16), SinkId>,
    next_packet_id: PacketId,
}

impl Network {
    /// Assemble the network from a built topology.
    ///
    /// Fails with `InvalidConfig` if two devices share an address or ids are not dense.
    pub fn new(topology: Topology, phy: PhyParameters, mac: MacParameters, seed: u64) -> SimResult<Self> {
        let Topology { nodes, devices, links } = topology;

        for (index, node) in nodes.iter().enumerate() {
            if node.id as usize != index {
                return Err(SimError::config(format!("node {} stored at index {}", node.id, index)));
            }
        }

        let mut addresses = HashMap::new();
        let mut macs = Vec::with_capacity(devices.len());
        for (index, device) in devices.iter().enumerate() {
            if device.id != index {
                return Err(SimError::config(format!("device {} stored at index {}", device.id, index)));
            }
            if device.node as usize >= nodes.len() {
                return Err(SimError::config(format!("device {} references unknown node {}", device.id, device.node)));
            }
            if let Some(previous) = addresses.insert(device.address, device.id) {
                return Err(SimError::config(format!(
                    "address {} assigned to devices {} and {}",
                    device.address, previous, device.id
                )));
            }
            macs.push(match device.kind {
                DeviceKind::Wireless => Some(CsmaMac::new(mac.clone(), derive_seed(seed, 0x4d41_4300 + device.id as u64))),
                DeviceKind::PointToPoint { .. } => None,
            });
        }

        log::debug!(
            "network assembled: {} nodes, {} devices, {} point-to-point links",
            nodes.len(),
            devices.len(),
            links.len()
        );

        Ok(Self {
            nodes,
            devices,
            links,
            channel: WirelessChannel::new(phy),
            pending_access: vec![None; macs.len()],
            macs,
            addresses,
            bindings: HashMap::new(),
            next_packet_id: 0,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn links(&self) -> &[PointToPointLink] {
        &self.links
    }

    pub fn channel(&self) -> &WirelessChannel {
        &self.channel
    }

    pub fn mac(&self, device: DeviceId) -> Option<&CsmaMac> {
        self.macs.get(device).and_then(Option::as_ref)
    }

    /// Scheduled access attempt of a wireless device, if any.
    pub fn pending_access(&self, device: DeviceId) -> Option<EventHandle> {
        self.pending_access.get(device).copied().flatten()
    }

    /// Number of datagrams handed to `send` so far.
    pub fn packets_sent(&self) -> u64 {
        self.next_packet_id
    }

    pub fn position_of(&self, node: NodeId, time: SimTime) -> Option<Point> {
        self.node(node).map(|n| n.mobility.position_at(time))
    }

    /// Device owning `address`, if any.
    pub fn resolve(&self, address: Ipv4Addr) -> Option<DeviceId> {
        self.addresses.get(&address).copied()
    }

    /// Wireless link budget between two nodes at `time`.
    pub fn can_deliver(&self, tx: NodeId, rx: NodeId, time: SimTime) -> Option<Reception> {
        let tx = self.node(tx)?;
        let rx = self.node(rx)?;
        Some(self.channel.can_deliver(&tx.mobility, &rx.mobility, time))
    }

    fn wireless_device_of(&self, node: NodeId) -> Option<&Device> {
        self.node(node)?
            .devices
            .iter()
            .filter_map(|id| self.devices.get(*id))
            .find(|d| d.kind == DeviceKind::Wireless)
    }

    /// Pick the outgoing device and destination address for traffic from `source` to `destination`.
    ///
    /// A point-to-point device linked directly to the destination wins over the wireless device.
    pub fn route(&self, source: NodeId, destination: NodeId) -> Option<(DeviceId, Ipv4Addr)> {
        let node = self.node(source)?;
        for device in node.devices.iter().filter_map(|id| self.devices.get(*id)) {
            if let DeviceKind::PointToPoint { link } = device.kind {
                let peer = self.links.get(link).and_then(|l| l.peer_of(device.id)).and_then(|p| self.devices.get(p));
                if let Some(peer) = peer.filter(|p| p.node == destination) {
                    return Some((device.id, peer.address));
                }
            }
        }
        let local = self.wireless_device_of(source)?;
        let remote = self.wireless_device_of(destination)?;
        Some((local.id, remote.address))
    }

    /// Bind a sink to a UDP port on a node.
    pub fn bind(&mut self, node: NodeId, port: u16, sink: SinkId) -> SimResult<()> {
        if self.node(node).is_none() {
            return Err(SimError::config(format!("cannot bind port {} on unknown node {}", port, node)));
        }
        match self.bindings.entry((node, port)) {
            Entry::Occupied(_) => Err(SimError::config(format!("port {} on node {} is already bound", port, node))),
            Entry::Vacant(slot) => {
                slot.insert(sink);
                Ok(())
            }
        }
    }

    pub fn bound_sink(&self, node: NodeId, port: u16) -> Option<SinkId> {
        self.bindings.get(&(node, port)).copied()
    }

    pub fn unbind(&mut self, node: NodeId, port: u16) -> Option<SinkId> {
        self.bindings.remove(&(node, port))
    }

    /// Apply a scheduled mobility direction change; returns the next change time.
    pub fn change_direction(&mut self, node: NodeId, time: SimTime) -> Option<SimTime> {
        self.nodes.get_mut(node as usize)?.mobility.change_direction(time)
    }

    /// Bring a device up or down. Frames queued on a device going down are
    /// dropped and its pending access attempt is cancelled.
    pub fn set_device_up(&mut self, device: DeviceId, up: bool, scheduler: &mut Scheduler<SimEvent>, trace: &mut TraceLog) -> SimResult<()> {
        let now = scheduler.now();
        let entry = self
            .devices
            .get_mut(device)
            .ok_or_else(|| SimError::config(format!("unknown device {}", device)))?;
        entry.up = up;
        let kind = entry.kind.link_kind();
        log::info!("device {} ({}) is now {}", device, entry.address, if up { "up" } else { "down" });
        if !up {
            if let Some(handle) = self.pending_access.get_mut(device).and_then(Option::take) {
                scheduler.cancel(handle);
            }
            if let Some(mac) = self.macs.get_mut(device).and_then(Option::as_mut) {
                for packet in mac.drain() {
                    trace.record(PacketRecord::new(now, &packet, kind, PacketOutcome::Dropped, Some(DropReason::DeviceDown)));
                }
            }
        }
        Ok(())
    }

    fn schedule_access(&mut self, device: DeviceId, delay: SimTime, scheduler: &mut Scheduler<SimEvent>) -> SimResult<()> {
        let handle = scheduler.schedule(delay, SimEvent::MacAccess(device))?;
        if let Some(slot) = self.pending_access.get_mut(device) {
            if let Some(stale) = slot.replace(handle) {
                if scheduler.is_pending(stale) {
                    log::warn!("device {} had an access attempt pending at {}, replacing it", device, stale.time());
                    scheduler.cancel(stale);
                }
            }
        }
        Ok(())
    }

    /// Hand a datagram to a device. Returns the id given to the packet.
    pub fn send(
        &mut self,
        device: DeviceId,
        source: SocketAddrV4,
        destination: SocketAddrV4,
        size: usize,
        scheduler: &mut Scheduler<SimEvent>,
        trace: &mut TraceLog,
    ) -> SimResult<PacketId> {
        let now = scheduler.now();
        let (kind, up) = match self.devices.get(device) {
            Some(d) => (d.kind, d.up),
            None => return Err(SimError::config(format!("send on unknown device {}", device))),
        };
        let packet = Packet {
            id: self.next_packet_id,
            source,
            destination,
            size,
            created: now,
        };
        self.next_packet_id += 1;
        let id = packet.id;

        if !up {
            trace.record(PacketRecord::new(now, &packet, kind.link_kind(), PacketOutcome::Dropped, Some(DropReason::DeviceDown)));
            return Ok(id);
        }

        match kind {
            DeviceKind::PointToPoint { link } => {
                let hop = self.links.get_mut(link).and_then(|l| l.transmit(device, size, now));
                match hop {
                    Some((peer, arrival)) => {
                        scheduler.schedule_at(arrival, SimEvent::LinkArrival { device: peer, packet })?;
                    }
                    None => {
                        trace.record(PacketRecord::new(now, &packet, LinkKind::PointToPoint, PacketOutcome::Dropped, Some(DropReason::NoRoute)));
                    }
                }
            }
            DeviceKind::Wireless => self.attempt_transmit(device, packet, scheduler, trace)?,
        }
        Ok(id)
    }

    /// Queue a frame in the MAC of a wireless device and start contention if it was idle.
    pub fn attempt_transmit(&mut self, device: DeviceId, packet: Packet, scheduler: &mut Scheduler<SimEvent>, trace: &mut TraceLog) -> SimResult<()> {
        let Some(mac) = self.macs.get_mut(device).and_then(Option::as_mut) else {
            trace.record(PacketRecord::new(scheduler.now(), &packet, LinkKind::Wireless, PacketOutcome::Dropped, Some(DropReason::NoRoute)));
            return Ok(());
        };
        match mac.enqueue(packet) {
            Ok(true) => self.on_mac_access(device, scheduler, trace),
            Ok(false) => Ok(()),
            Err(packet) => {
                log::debug!("queue full on device {}, dropping packet {}", device, packet.id);
                trace.record(PacketRecord::new(scheduler.now(), &packet, LinkKind::Wireless, PacketOutcome::Dropped, Some(DropReason::QueueOverflow)));
                Ok(())
            }
        }
    }

    /// Carrier-sense attempt for a wireless device.
    pub fn on_mac_access(&mut self, device: DeviceId, scheduler: &mut Scheduler<SimEvent>, trace: &mut TraceLog) -> SimResult<()> {
        let now = scheduler.now();
        if let Some(slot) = self.pending_access.get_mut(device) {
            *slot = None;
        }
        let Some((node_id, up)) = self.devices.get(device).map(|d| (d.node, d.up)) else {
            return Ok(());
        };
        if !up {
            if let Some(mac) = self.macs.get_mut(device).and_then(Option::as_mut) {
                for packet in mac.drain() {
                    trace.record(PacketRecord::new(now, &packet, LinkKind::Wireless, PacketOutcome::Dropped, Some(DropReason::DeviceDown)));
                }
            }
            return Ok(());
        }
        let Some(position) = self.position_of(node_id, now) else {
            return Ok(());
        };
        let busy = self.channel.is_busy(node_id, &position, now);

        let Some(mac) = self.macs.get_mut(device).and_then(Option::as_mut) else {
            return Ok(());
        };
        let action = mac.access(busy);
        let difs = mac.params().difs();
        let contending = mac.state() == MacState::Contending;

        match action {
            MacAction::Transmit(packet) => self.start_transmission(device, node_id, position, packet, scheduler, trace),
            MacAction::Backoff(delay) => {
                log::trace!("device {} backs off {} at {} (medium busy: {})", device, delay, now, busy);
                self.schedule_access(device, delay, scheduler)
            }
            MacAction::Drop(packet) => {
                log::debug!("device {} gave up on packet {} after repeated busy senses", device, packet.id);
                trace.record(PacketRecord::new(now, &packet, LinkKind::Wireless, PacketOutcome::Dropped, Some(DropReason::RetryLimit)));
                if contending {
                    self.schedule_access(device, difs, scheduler)?;
                }
                Ok(())
            }
            MacAction::Idle => Ok(()),
        }
    }

    fn start_transmission(
        &mut self,
        device: DeviceId,
        node: NodeId,
        origin: Point,
        packet: Packet,
        scheduler: &mut Scheduler<SimEvent>,
        trace: &mut TraceLog,
    ) -> SimResult<()> {
        let now = scheduler.now();
        let airtime = calculate_air_time(packet.size, self.channel.params());
        let transmission = self.channel.begin_transmission(node, origin, now, airtime);
        scheduler.schedule(airtime, SimEvent::TxEnd(device))?;

        let receiver = self
            .resolve(*packet.destination.ip())
            .and_then(|id| self.devices.get(id))
            .filter(|d| d.kind == DeviceKind::Wireless)
            .map(|d| (d.id, d.node));
        let Some((receiver, rx_node)) = receiver else {
            trace.record(PacketRecord::new(now, &packet, LinkKind::Wireless, PacketOutcome::Dropped, Some(DropReason::NoRoute)));
            return Ok(());
        };
        let Some(rx_position) = self.position_of(rx_node, now) else {
            return Ok(());
        };

        let reception = self.channel.reception_between(&origin, &rx_position);
        let arrival_start = now + reception.delay;
        let arrival_end = arrival_start + airtime;
        log::trace!(
            "device {} transmits packet {} to device {} (rssi {:.1} dBm, airtime {})",
            device,
            packet.id,
            receiver,
            reception.rssi_dbm,
            airtime
        );
        scheduler.schedule_at(
            arrival_end,
            SimEvent::RxEnd(PendingReception {
                transmission,
                sender: device,
                packet,
                receiver,
                delivered: reception.delivered,
                arrival_start,
                arrival_end,
            }),
        )?;
        Ok(())
    }

    /// A wireless transmission finished; run the post-backoff before the next access attempt.
    pub fn on_tx_end(&mut self, device: DeviceId, scheduler: &mut Scheduler<SimEvent>) -> SimResult<()> {
        if let Some(delay) = self.macs.get_mut(device).and_then(Option::as_mut).map(CsmaMac::on_tx_end) {
            self.schedule_access(device, delay, scheduler)?;
        }
        Ok(())
    }

    /// Last bit of a wireless frame reached the receiver. Returns the sink to credit on success.
    pub fn on_rx_end(&mut self, rx: PendingReception, now: SimTime, trace: &mut TraceLog) -> Option<(SinkId, Packet)> {
        let (rx_node, up) = match self.devices.get(rx.receiver) {
            Some(d) => (d.node, d.up),
            None => {
                trace.record(PacketRecord::new(now, &rx.packet, LinkKind::Wireless, PacketOutcome::Dropped, Some(DropReason::NoRoute)));
                return None;
            }
        };

        if !rx.delivered {
            trace.record(PacketRecord::new(now, &rx.packet, LinkKind::Wireless, PacketOutcome::Dropped, Some(DropReason::BelowThreshold)));
            return None;
        }

        let position = self.position_of(rx_node, rx.arrival_start).unwrap_or_default();
        let sender = self.macs.get_mut(rx.sender).and_then(Option::as_mut);
        if self.channel.collides(rx.transmission, rx_node, &position, rx.arrival_start, rx.arrival_end) {
            if let Some(mac) = sender {
                mac.on_frame_collided();
            }
            trace.record(PacketRecord::new(now, &rx.packet, LinkKind::Wireless, PacketOutcome::Collided, None));
            return None;
        }

        if !up {
            trace.record(PacketRecord::new(now, &rx.packet, LinkKind::Wireless, PacketOutcome::Dropped, Some(DropReason::DeviceDown)));
            return None;
        }
        if let Some(mac) = sender {
            mac.on_frame_delivered();
        }

        self.deliver_local(rx_node, rx.packet, LinkKind::Wireless, now, trace)
    }

    /// Frame reached the far end of a point-to-point link.
    pub fn on_link_arrival(&mut self, device: DeviceId, packet: Packet, now: SimTime, trace: &mut TraceLog) -> Option<(SinkId, Packet)> {
        let Some((node, up)) = self.devices.get(device).map(|d| (d.node, d.up)) else {
            trace.record(PacketRecord::new(now, &packet, LinkKind::PointToPoint, PacketOutcome::Dropped, Some(DropReason::NoRoute)));
            return None;
        };
        if !up {
            trace.record(PacketRecord::new(now, &packet, LinkKind::PointToPoint, PacketOutcome::Dropped, Some(DropReason::DeviceDown)));
            return None;
        }
        self.deliver_local(node, packet, LinkKind::PointToPoint, now, trace)
    }

    fn deliver_local(&self, node: NodeId, packet: Packet, link: LinkKind, now: SimTime, trace: &mut TraceLog) -> Option<(SinkId, Packet)> {
        match self.bindings.get(&(node, packet.destination.port())) {
            Some(sink) => {
                trace.record(PacketRecord::new(now, &packet, link, PacketOutcome::Delivered, None));
                Some((*sink, packet))
            }
            None => {
                trace.record(PacketRecord::new(now, &packet, link, PacketOutcome::Dropped, Some(DropReason::NoListener)));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::channel::LinkParameters;
    use crate::simulation::mobility::{ConstantPosition, MobilityModel};
    use crate::simulation::topology::{install_monitor_links, install_wireless_devices};

    fn static_node(id: NodeId, x: f64, y: f64) -> Node {
        Node {
            id,
            name: format!("node-{id}"),
            mobility: MobilityModel::Constant(ConstantPosition::new(Point::new(x, y))),
            devices: Vec::new(),
        }
    }

    /// Two mesh nodes 5 m apart plus a monitor wired to both.
    fn small_network() -> Network {
        let mut nodes = vec![static_node(0, 0.0, 0.0), static_node(1, 5.0, 0.0), static_node(2, 0.0, 5.0)];
        let mut devices = install_wireless_devices(&mut nodes[..2]);
        let links = install_monitor_links(&mut nodes, &mut devices, 2, &LinkParameters::default());
        Network::new(Topology { nodes, devices, links }, PhyParameters::default(), MacParameters::default(), 1).unwrap()
    }

    fn drive(network: &mut Network, scheduler: &mut Scheduler<SimEvent>, trace: &mut TraceLog) -> Vec<(SinkId, Packet)> {
        let mut delivered = Vec::new();
        while let Some((time, event)) = scheduler.pop_until(SimTime::from_secs(10)) {
            match event {
                SimEvent::MacAccess(d) => network.on_mac_access(d, scheduler, trace).unwrap(),
                SimEvent::TxEnd(d) => network.on_tx_end(d, scheduler).unwrap(),
                SimEvent::RxEnd(rx) => delivered.extend(network.on_rx_end(rx, time, trace)),
                SimEvent::LinkArrival { device, packet } => delivered.extend(network.on_link_arrival(device, packet, time, trace)),
                other => panic!("unexpected {other:?}"),
            }
        }
        delivered
    }

    #[test]
    fn addresses_follow_the_plan() {
        let network = small_network();
        assert_eq!(network.resolve(Ipv4Addr::new(10, 1, 1, 1)), Some(0));
        assert_eq!(network.resolve(Ipv4Addr::new(10, 1, 1, 2)), Some(1));
        assert!(network.resolve(Ipv4Addr::new(10, 2, 1, 1)).is_some());
        assert!(network.resolve(Ipv4Addr::new(10, 2, 2, 2)).is_some());
    }

    #[test]
    fn route_prefers_point_to_point() {
        let network = small_network();
        let (device, address) = network.route(0, 2).unwrap();
        assert_eq!(network.device(device).unwrap().kind.link_kind(), LinkKind::PointToPoint);
        assert_eq!(address, Ipv4Addr::new(10, 2, 1, 2));
        let (device, address) = network.route(0, 1).unwrap();
        assert_eq!(device, 0);
        assert_eq!(address, Ipv4Addr::new(10, 1, 1, 2));
        // The monitor has no wireless device.
        assert!(network.route(2, 0).is_some());
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let mut network = small_network();
        network.bind(1, 10, 0).unwrap();
        assert!(matches!(network.bind(1, 10, 1), Err(SimError::InvalidConfig(_))));
        assert!(network.bind(7, 10, 1).is_err());
        assert_eq!(network.unbind(1, 10), Some(0));
    }

    #[test]
    fn wireless_delivery_to_bound_port() {
        let mut network = small_network();
        let mut scheduler = Scheduler::new();
        let mut trace = TraceLog::new();
        network.bind(1, 10, 3).unwrap();
        let src = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153);
        let dst = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 10);
        network.send(0, src, dst, 512, &mut scheduler, &mut trace).unwrap();
        let delivered = drive(&mut network, &mut scheduler, &mut trace);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, 3);
        let record = trace.records().next().unwrap();
        assert_eq!(record.outcome, PacketOutcome::Delivered);
        assert_eq!(record.link, LinkKind::Wireless);
        // Airtime plus 5 m of propagation.
        let expected = calculate_air_time(512, &PhyParameters::default()) + SimTime::from_nanos(17);
        assert_eq!(record.timestamp, expected);
    }

    #[test]
    fn unbound_port_is_dropped() {
        let mut network = small_network();
        let mut scheduler = Scheduler::new();
        let mut trace = TraceLog::new();
        let src = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153);
        let dst = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 99);
        network.send(0, src, dst, 512, &mut scheduler, &mut trace).unwrap();
        assert!(drive(&mut network, &mut scheduler, &mut trace).is_empty());
        let record = trace.records().next().unwrap();
        assert_eq!(record.outcome, PacketOutcome::Dropped);
        assert_eq!(record.reason, Some(DropReason::NoListener));
    }

    #[test]
    fn back_to_back_frames_wait_a_post_backoff() {
        let mut network = small_network();
        let mut scheduler = Scheduler::new();
        let mut trace = TraceLog::new();
        network.bind(1, 10, 0).unwrap();
        let src = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153);
        let dst = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 10);
        for _ in 0..3 {
            network.send(0, src, dst, 512, &mut scheduler, &mut trace).unwrap();
        }
        assert_eq!(drive(&mut network, &mut scheduler, &mut trace).len(), 3);
        let times: Vec<SimTime> = trace.records().map(|r| r.timestamp).collect();
        let params = MacParameters::default();
        let shortest = calculate_air_time(512, &PhyParameters::default()) + params.difs();
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= shortest, "gap {gap} below airtime plus DIFS");
            assert!(gap <= shortest + params.slot() * i64::from(params.cw_min), "gap {gap} beyond the window");
        }
    }

    #[test]
    fn collided_senders_widen_their_windows() {
        let mut nodes = vec![static_node(0, 0.0, 0.0), static_node(1, 5.0, 0.0), static_node(2, -5.0, 0.0)];
        let devices = install_wireless_devices(&mut nodes);
        let mut network =
            Network::new(Topology { nodes, devices, links: Vec::new() }, PhyParameters::default(), MacParameters::default(), 1).unwrap();
        let mut scheduler = Scheduler::new();
        let mut trace = TraceLog::new();
        network.bind(0, 10, 0).unwrap();
        let dst = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 10);
        for device in [1, 2] {
            let src = SocketAddrV4::new(network.device(device).unwrap().address, 49153);
            network.send(device, src, dst, 512, &mut scheduler, &mut trace).unwrap();
        }
        assert!(drive(&mut network, &mut scheduler, &mut trace).is_empty());
        assert!(trace.records().all(|r| r.outcome == PacketOutcome::Collided));
        assert_eq!(network.mac(1).unwrap().contention_window(), 31);
        assert_eq!(network.mac(2).unwrap().contention_window(), 31);
        // The receiver never sent anything.
        assert_eq!(network.mac(0).unwrap().contention_window(), 15);
    }

    #[test]
    fn device_down_cancels_pending_access() {
        let mut network = small_network();
        let mut scheduler = Scheduler::new();
        let mut trace = TraceLog::new();
        let a = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153);
        let b = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 49153);
        // Node 1 occupies the medium; node 0 senses it and backs off.
        network.send(1, b, a, 512, &mut scheduler, &mut trace).unwrap();
        scheduler.advance_to(SimTime::from_micros(100));
        network.send(0, a, b, 512, &mut scheduler, &mut trace).unwrap();
        let retry = network.pending_access(0).expect("busy medium schedules a retry");
        let live = scheduler.len();

        network.set_device_up(0, false, &mut scheduler, &mut trace).unwrap();
        assert!(!scheduler.is_pending(retry));
        assert_eq!(network.pending_access(0), None);
        assert_eq!(network.mac(0).unwrap().state(), MacState::Idle);

        network.set_device_up(0, true, &mut scheduler, &mut trace).unwrap();
        network.send(0, a, b, 512, &mut scheduler, &mut trace).unwrap();
        // One access chain, not two.
        assert_eq!(scheduler.len(), live);
        assert!(network.pending_access(0).is_some_and(|h| h != retry));
        assert_eq!(trace.records().filter(|r| r.reason == Some(DropReason::DeviceDown)).count(), 1);
    }

    #[test]
    fn point_to_point_delivery_and_device_down() {
        let mut network = small_network();
        let mut scheduler = Scheduler::new();
        let mut trace = TraceLog::new();
        network.bind(2, 9999, 5).unwrap();
        let (device, address) = network.route(0, 2).unwrap();
        let src = SocketAddrV4::new(network.device(device).unwrap().address, 49153);
        let dst = SocketAddrV4::new(address, 9999);
        network.send(device, src, dst, 512, &mut scheduler, &mut trace).unwrap();
        let delivered = drive(&mut network, &mut scheduler, &mut trace);
        assert_eq!(delivered.len(), 1);
        // 512 B at 5 Mb/s plus 2 ms.
        assert_eq!(trace.records().next().unwrap().timestamp, SimTime::from_nanos(2_819_200));

        network.set_device_up(device, false, &mut scheduler, &mut trace).unwrap();
        network.send(device, src, dst, 512, &mut scheduler, &mut trace).unwrap();
        let last = trace.records().last().unwrap();
        assert_eq!(last.outcome, PacketOutcome::Dropped);
        assert_eq!(last.reason, Some(DropReason::DeviceDown));
    }

    #[test]
    fn out_of_range_is_below_threshold() {
        let mut nodes = vec![static_node(0, 0.0, 0.0), static_node(1, 400.0, 0.0)];
        let devices = install_wireless_devices(&mut nodes);
        let mut network =
            Network::new(Topology { nodes, devices, links: Vec::new() }, PhyParameters::default(), MacParameters::default(), 1).unwrap();
        assert!(!network.can_deliver(0, 1, SimTime::ZERO).unwrap().delivered);
        let mut scheduler = Scheduler::new();
        let mut trace = TraceLog::new();
        network.bind(1, 10, 0).unwrap();
        let src = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153);
        let dst = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 10);
        network.send(0, src, dst, 512, &mut scheduler, &mut trace).unwrap();
        drive(&mut network, &mut scheduler, &mut trace);
        assert_eq!(trace.records().next().unwrap().reason, Some(DropReason::BelowThreshold));
    }
}
