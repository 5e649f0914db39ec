//! Event payloads dispatched by the simulator loop.

use super::clock::SimTime;
use super::types::{AppId, DeviceId, NodeId, Packet, SinkId};

/// A wireless frame on its way to the node that owns the destination address.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReception {
    pub transmission: u64,
    /// Wireless device that sent the frame.
    pub sender: DeviceId,
    pub packet: Packet,
    pub receiver: DeviceId,
    /// Link budget result computed when the frame started.
    pub delivered: bool,
    pub arrival_start: SimTime,
    pub arrival_end: SimTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    AppStart(AppId),
    AppStop(AppId),
    /// Switch between the On and Off periods.
    AppToggle(AppId),
    AppSend(AppId),
    /// Sink stops listening; its port is released.
    SinkStop(SinkId),
    MobilityChange(NodeId),
    /// Carrier-sense attempt on a wireless device.
    MacAccess(DeviceId),
    TxEnd(DeviceId),
    RxEnd(PendingReception),
    /// Last bit of a frame reached the far end of a point-to-point link.
    LinkArrival { device: DeviceId, packet: Packet },
}
