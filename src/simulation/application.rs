//! Traffic applications: constant-rate on/off sources and packet sinks.
//!
//! Sources drive themselves through scheduler events (`AppStart`, `AppToggle`,
//! `AppSend`, `AppStop`). They never touch the network directly; `on_send`
//! returns the datagram to emit and the simulator hands it to the network.

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use super::clock::SimTime;
use super::events::SimEvent;
use super::scheduler::{EventHandle, Scheduler};
use super::signal_calculations::serialization_time;
use super::types::{AppId, DeviceId, NodeId, Packet, SinkId};
use crate::error::SimResult;

/// First ephemeral port; source `i` binds `EPHEMERAL_PORT_BASE + i`.
pub const EPHEMERAL_PORT_BASE: u16 = 49153;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Scheduled,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct OnOffConfig {
    pub node: NodeId,
    pub device: DeviceId,
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub rate_bps: f64,
    pub packet_size: usize,
    pub start: SimTime,
    pub stop: SimTime,
    /// Length of each On period; `None` stays On for the whole run.
    pub on_time: Option<SimTime>,
    pub off_time: SimTime,
}

/// Datagram an application wants sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub device: DeviceId,
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub size: usize,
}

pub struct OnOffSource {
    pub id: AppId,
    config: OnOffConfig,
    interval: SimTime,
    state: AppState,
    on: bool,
    next_send: Option<EventHandle>,
    next_toggle: Option<EventHandle>,
    packets_sent: u64,
    bytes_sent: u64,
}

impl OnOffSource {
    pub fn new(id: AppId, config: OnOffConfig) -> Self {
        let interval = serialization_time(config.packet_size, config.rate_bps);
        Self {
            id,
            config,
            interval,
            state: AppState::Scheduled,
            on: false,
            next_send: None,
            next_toggle: None,
            packets_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn config(&self) -> &OnOffConfig {
        &self.config
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Gap between consecutive packets while On.
    pub fn interval(&self) -> SimTime {
        self.interval
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Schedule the start and stop events.
    pub fn install(&self, scheduler: &mut Scheduler<SimEvent>) -> SimResult<()> {
        scheduler.schedule_at(self.config.start, SimEvent::AppStart(self.id))?;
        scheduler.schedule_at(self.config.stop, SimEvent::AppStop(self.id))?;
        Ok(())
    }

    pub fn on_start(&mut self, scheduler: &mut Scheduler<SimEvent>) -> SimResult<()> {
        if self.state != AppState::Scheduled {
            return Ok(());
        }
        self.state = AppState::Running;
        log::debug!("app {} started at {}", self.id, scheduler.now());
        self.enter_on(scheduler)
    }

    fn enter_on(&mut self, scheduler: &mut Scheduler<SimEvent>) -> SimResult<()> {
        self.on = true;
        self.next_send = Some(scheduler.schedule(self.interval, SimEvent::AppSend(self.id))?);
        if let Some(on_time) = self.config.on_time {
            self.next_toggle = Some(scheduler.schedule(on_time, SimEvent::AppToggle(self.id))?);
        }
        Ok(())
    }

    fn enter_off(&mut self, scheduler: &mut Scheduler<SimEvent>) -> SimResult<()> {
        self.on = false;
        if let Some(handle) = self.next_send.take() {
            scheduler.cancel(handle);
        }
        self.next_toggle = Some(scheduler.schedule(self.config.off_time, SimEvent::AppToggle(self.id))?);
        Ok(())
    }

    pub fn on_toggle(&mut self, scheduler: &mut Scheduler<SimEvent>) -> SimResult<()> {
        self.next_toggle = None;
        if self.state != AppState::Running {
            return Ok(());
        }
        if self.on { self.enter_off(scheduler) } else { self.enter_on(scheduler) }
    }

    /// Handle a send event: schedule the next one and return the datagram to emit.
    pub fn on_send(&mut self, scheduler: &mut Scheduler<SimEvent>) -> SimResult<Option<Emission>> {
        self.next_send = None;
        if self.state != AppState::Running || !self.on {
            return Ok(None);
        }
        self.next_send = Some(scheduler.schedule(self.interval, SimEvent::AppSend(self.id))?);
        self.packets_sent += 1;
        self.bytes_sent += self.config.packet_size as u64;
        Ok(Some(Emission {
            device: self.config.device,
            local: self.config.local,
            remote: self.config.remote,
            size: self.config.packet_size,
        }))
    }

    /// Stop the source and cancel whatever it still has pending.
    pub fn on_stop(&mut self, scheduler: &mut Scheduler<SimEvent>) {
        if self.state == AppState::Stopped {
            return;
        }
        for handle in [self.next_send.take(), self.next_toggle.take()].into_iter().flatten() {
            scheduler.cancel(handle);
        }
        self.on = false;
        self.state = AppState::Stopped;
        log::debug!("app {} stopped after {} packets", self.id, self.packets_sent);
    }
}

/// Receiver bound to a UDP port on one node.
#[derive(Debug, Clone)]
pub struct PacketSink {
    pub id: SinkId,
    pub node: NodeId,
    pub port: u16,
    pub stop: Option<SimTime>,
    packets: u64,
    bytes: u64,
    last_received: Option<SimTime>,
    per_source: BTreeMap<Ipv4Addr, u64>,
}

impl PacketSink {
    pub fn new(id: SinkId, node: NodeId, port: u16, stop: Option<SimTime>) -> Self {
        Self {
            id,
            node,
            port,
            stop,
            packets: 0,
            bytes: 0,
            last_received: None,
            per_source: BTreeMap::new(),
        }
    }

    pub fn install(&self, scheduler: &mut Scheduler<SimEvent>) -> SimResult<()> {
        if let Some(stop) = self.stop {
            scheduler.schedule_at(stop, SimEvent::SinkStop(self.id))?;
        }
        Ok(())
    }

    pub fn receive(&mut self, packet: &Packet, now: SimTime) {
        self.packets += 1;
        self.bytes += packet.size as u64;
        self.last_received = Some(now);
        *self.per_source.entry(*packet.source.ip()).or_insert(0) += 1;
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn last_received(&self) -> Option<SimTime> {
        self.last_received
    }

    pub fn per_source(&self) -> &BTreeMap<Ipv4Addr, u64> {
        &self.per_source
    }
}
