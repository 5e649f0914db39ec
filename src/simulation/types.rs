//! Type definitions shared across the simulation.
//!
//! Contains:
//! - Identifiers for nodes, devices, links and applications
//! - Nodes with their mobility model and installed devices
//! - Devices (wireless or point-to-point) with their static address
//! - The packet travelling through the stack

use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddrV4};

use super::clock::SimTime;
use super::mobility::MobilityModel;

pub type NodeId = u32;
pub type DeviceId = usize;
pub type LinkId = usize;
pub type AppId = usize;
pub type SinkId = usize;
pub type PacketId = u64;

/// Which kind of medium carried a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Wireless,
    PointToPoint,
}

impl LinkKind {
    pub fn short_name(&self) -> &'static str {
        match self {
            LinkKind::Wireless => "wifi",
            LinkKind::PointToPoint => "p2p",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Wireless,
    PointToPoint { link: LinkId },
}

impl DeviceKind {
    pub fn link_kind(&self) -> LinkKind {
        match self {
            DeviceKind::Wireless => LinkKind::Wireless,
            DeviceKind::PointToPoint { .. } => LinkKind::PointToPoint,
        }
    }
}

/// Network interface installed on a node at setup time.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub node: NodeId,
    pub kind: DeviceKind,
    pub address: Ipv4Addr,
    /// Down devices neither send nor receive.
    pub up: bool,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub mobility: MobilityModel,
    pub devices: Vec<DeviceId>,
}

/// A UDP datagram in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub id: PacketId,
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    /// Payload size in bytes.
    pub size: usize,
    pub created: SimTime,
}
