//! Wireless broadcast channel and dedicated point-to-point links.
//!
//! The wireless channel remembers recent transmissions so it can answer two
//! questions at any instant: is a node's medium busy (carrier sense), and did
//! anything else overlap a frame at its receiver (collision). Reception
//! quality itself is never cached; it is recomputed from the current
//! positions on each call.

use serde::Deserialize;

use super::clock::SimTime;
use super::geometry::{Point, distance};
use super::mobility::Mobility;
use super::signal_calculations::{PhyParameters, calculate_rssi, dbm_to_mw, is_receivable, mw_to_dbm, propagation_delay, serialization_time};
use super::types::{DeviceId, LinkId, NodeId};

/// Extra time transmissions are kept after they could still overlap a pending reception.
const PRUNE_SLACK: SimTime = SimTime::from_millis(1);

/// Result of evaluating one transmitter/receiver pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reception {
    pub delivered: bool,
    pub rssi_dbm: f64,
    pub delay: SimTime,
}

/// A frame on the air.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub id: u64,
    pub source: NodeId,
    /// Transmitter position when the frame started.
    pub origin: Point,
    pub start: SimTime,
    pub end: SimTime,
}

fn overlaps(a_start: SimTime, a_end: SimTime, b_start: SimTime, b_end: SimTime) -> bool {
    a_start < b_end && b_start < a_end
}

pub struct WirelessChannel {
    params: PhyParameters,
    transmissions: Vec<Transmission>,
    longest_airtime: SimTime,
    next_transmission_id: u64,
}

impl WirelessChannel {
    pub fn new(params: PhyParameters) -> Self {
        Self {
            params,
            transmissions: Vec::new(),
            longest_airtime: SimTime::ZERO,
            next_transmission_id: 0,
        }
    }

    pub fn params(&self) -> &PhyParameters {
        &self.params
    }

    /// Evaluate a link between two fixed points.
    pub fn reception_between(&self, from: &Point, to: &Point) -> Reception {
        let d = distance(from, to);
        let rssi_dbm = calculate_rssi(d, &self.params);
        Reception {
            delivered: is_receivable(rssi_dbm, &self.params),
            rssi_dbm,
            delay: propagation_delay(d, &self.params),
        }
    }

    /// Evaluate a link between two moving nodes at `time`.
    pub fn can_deliver(&self, tx: &impl Mobility, rx: &impl Mobility, time: SimTime) -> Reception {
        self.reception_between(&tx.position_at(time), &rx.position_at(time))
    }

    /// Put a frame on the air and return its id.
    pub fn begin_transmission(&mut self, source: NodeId, origin: Point, start: SimTime, airtime: SimTime) -> u64 {
        self.prune(start);
        let id = self.next_transmission_id;
        self.next_transmission_id += 1;
        if airtime > self.longest_airtime {
            self.longest_airtime = airtime;
        }
        self.transmissions.push(Transmission {
            id,
            source,
            origin,
            start,
            end: start + airtime,
        });
        id
    }

    /// Forget transmissions too old to overlap any reception still in progress.
    fn prune(&mut self, now: SimTime) {
        let horizon = self.longest_airtime + PRUNE_SLACK;
        self.transmissions.retain(|t| t.end + horizon >= now);
    }

    pub fn active_transmissions(&self) -> usize {
        self.transmissions.len()
    }

    /// Energy detection: total power of frames arriving at `position` at `time`,
    /// excluding the node's own transmissions, compared against the CCA threshold.
    pub fn is_busy(&self, node: NodeId, position: &Point, time: SimTime) -> bool {
        let mut energy_mw = 0.0;
        for t in self.transmissions.iter().filter(|t| t.source != node) {
            let d = distance(&t.origin, position);
            let delay = propagation_delay(d, &self.params);
            if t.start + delay <= time && time < t.end + delay {
                energy_mw += dbm_to_mw(calculate_rssi(d, &self.params));
            }
        }
        energy_mw > 0.0 && mw_to_dbm(energy_mw) >= self.params.cca_threshold_dbm
    }

    /// Whether another frame overlapped `[arrival_start, arrival_end)` at the receiver.
    ///
    /// The receiver's own transmissions always count (half duplex). Frames from
    /// other nodes count when they arrive at or above the CCA threshold.
    pub fn collides(&self, transmission: u64, receiver: NodeId, position: &Point, arrival_start: SimTime, arrival_end: SimTime) -> bool {
        self.transmissions.iter().filter(|t| t.id != transmission).any(|t| {
            if t.source == receiver {
                return overlaps(t.start, t.end, arrival_start, arrival_end);
            }
            let d = distance(&t.origin, position);
            if calculate_rssi(d, &self.params) < self.params.cca_threshold_dbm {
                return false;
            }
            let delay = propagation_delay(d, &self.params);
            overlaps(t.start + delay, t.end + delay, arrival_start, arrival_end)
        })
    }
}

/// Parameters of the wired links between the mesh nodes and the monitor.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LinkParameters {
    pub data_rate_bps: f64,
    pub delay_ms: f64,
}

impl Default for LinkParameters {
    fn default() -> Self {
        Self {
            data_rate_bps: 5e6,
            delay_ms: 2.0,
        }
    }
}

/// Lossless full-duplex link between exactly two devices.
///
/// Each direction serializes its frames back to back; there is no contention.
#[derive(Debug, Clone)]
pub struct PointToPointLink {
    pub id: LinkId,
    pub ends: [DeviceId; 2],
    data_rate_bps: f64,
    delay: SimTime,
    busy_until: [SimTime; 2],
}

impl PointToPointLink {
    pub fn new(id: LinkId, ends: [DeviceId; 2], params: &LinkParameters) -> Self {
        Self {
            id,
            ends,
            data_rate_bps: params.data_rate_bps,
            delay: SimTime::from_secs_f64(params.delay_ms / 1000.0),
            busy_until: [SimTime::ZERO; 2],
        }
    }

    pub fn peer_of(&self, device: DeviceId) -> Option<DeviceId> {
        match self.ends {
            [a, b] if a == device => Some(b),
            [a, b] if b == device => Some(a),
            _ => None,
        }
    }

    /// Queue `size_bytes` from `from` at `now`. Returns the peer and the arrival time of the last bit.
    pub fn transmit(&mut self, from: DeviceId, size_bytes: usize, now: SimTime) -> Option<(DeviceId, SimTime)> {
        let side = self.ends.iter().position(|d| *d == from)?;
        let start = now.max(self.busy_until[side]);
        let finished = start + serialization_time(size_bytes, self.data_rate_bps);
        self.busy_until[side] = finished;
        Some((self.ends[1 - side], finished + self.delay))
    }
}
