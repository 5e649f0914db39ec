//! Simulator: wires the scheduler, network, applications and trace together
//! and runs the dispatch loop.
//!
//! The loop pops the earliest live event, advances the clock to it and
//! handles it synchronously before popping the next one. Everything happens on
//! the calling thread, so two runs of the same scenario produce the same
//! record sequence.

use serde::Serialize;
use std::fmt;
use std::io;

use super::application::{AppState, OnOffSource, PacketSink};
use super::clock::SimTime;
use super::events::SimEvent;
use super::network::Network;
use super::scheduler::{EventHandle, Scheduler};
use super::signal_calculations::calculate_effective_distance;
use super::topology::{build_topology, install_applications};
use super::trace::{OutcomeCounts, PacketRecord, TraceLog, TraceSink};
use super::types::{DeviceId, NodeId};
use crate::common::scenario::{Scenario, validate_scenario};
use crate::error::{SimError, SimResult};

/// Per-sink counters reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkSummary {
    pub node: NodeId,
    pub port: u16,
    pub packets: u64,
    pub bytes: u64,
    pub last_received_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub simulated_s: f64,
    pub events_dispatched: u64,
    /// Live events still queued when the run stopped.
    pub events_discarded: usize,
    pub packets_sent: u64,
    #[serde(flatten)]
    pub outcomes: OutcomeCounts,
    pub sinks: Vec<SinkSummary>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulated time:    {:.3} s", self.simulated_s)?;
        writeln!(f, "Events dispatched: {} ({} discarded at stop)", self.events_dispatched, self.events_discarded)?;
        writeln!(f, "Packets sent:      {}", self.packets_sent)?;
        writeln!(f, "  delivered:       {}", self.outcomes.delivered)?;
        writeln!(f, "  dropped:         {}", self.outcomes.dropped)?;
        writeln!(f, "  collided:        {}", self.outcomes.collided)?;
        for sink in self.sinks.iter().filter(|s| s.packets > 0) {
            writeln!(f, "  sink node {} port {}: {} packets, {} bytes", sink.node, sink.port, sink.packets, sink.bytes)?;
        }
        Ok(())
    }
}

pub struct Simulator {
    scheduler: Scheduler<SimEvent>,
    network: Network,
    sources: Vec<OnOffSource>,
    sinks: Vec<PacketSink>,
    trace: TraceLog,
    stop_time: SimTime,
}

impl Simulator {
    /// Validate the scenario, build the topology and schedule every initial event.
    pub fn from_scenario(scenario: &Scenario) -> SimResult<Self> {
        validate_scenario(scenario).map_err(SimError::InvalidConfig)?;

        let mut network = Network::new(build_topology(scenario), scenario.phy.clone(), scenario.mac.clone(), scenario.seed)?;
        let mut scheduler = Scheduler::new();
        let (sources, sinks) = install_applications(scenario, &mut network, &mut scheduler)?;

        for node in network.nodes() {
            if let Some(first) = node.mobility.first_change() {
                scheduler.schedule_at(first, SimEvent::MobilityChange(node.id))?;
            }
        }

        log::info!(
            "Simulator ready: {} nodes, {} sources, radio range {:.1} m, stop at {}",
            network.nodes().len(),
            sources.len(),
            calculate_effective_distance(&scenario.phy),
            scenario.stop_time()
        );

        Ok(Self {
            scheduler,
            network,
            sources,
            sinks,
            trace: TraceLog::new(),
            stop_time: scenario.stop_time(),
        })
    }

    pub fn attach_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace.attach(sink);
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn stop_time(&self) -> SimTime {
        self.stop_time
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn sources(&self) -> &[OnOffSource] {
        &self.sources
    }

    pub fn sinks(&self) -> &[PacketSink] {
        &self.sinks
    }

    pub fn records(&self) -> impl Iterator<Item = &PacketRecord> {
        self.trace.records()
    }

    pub fn outcomes(&self) -> OutcomeCounts {
        self.trace.counts()
    }

    /// Inject an event from outside the run loop.
    pub fn schedule(&mut self, delay: SimTime, event: SimEvent) -> SimResult<EventHandle> {
        self.scheduler.schedule(delay, event)
    }

    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.scheduler.cancel(handle)
    }

    pub fn set_device_up(&mut self, device: DeviceId, up: bool) -> SimResult<()> {
        self.network.set_device_up(device, up, &mut self.scheduler, &mut self.trace)
    }

    /// Dispatch events up to `end` (capped at the scenario stop time).
    pub fn run_until(&mut self, end: SimTime) -> SimResult<()> {
        let end = end.min(self.stop_time);
        while let Some((time, event)) = self.scheduler.pop_until(end) {
            self.dispatch(time, event)?;
        }
        self.scheduler.advance_to(end);
        Ok(())
    }

    /// Run to the scenario stop time.
    pub fn run(&mut self) -> SimResult<()> {
        let started = chrono::Local::now();
        self.run_until(self.stop_time)?;
        let elapsed = chrono::Local::now() - started;
        log::info!(
            "Reached {} after {} events in {} ms wall time",
            self.scheduler.now(),
            self.scheduler.dispatched(),
            elapsed.num_milliseconds()
        );
        Ok(())
    }

    /// Stop running sources, discard pending events and flush the trace writers.
    pub fn finish(&mut self) -> io::Result<RunSummary> {
        for source in self.sources.iter_mut().filter(|s| s.state() == AppState::Running) {
            source.on_stop(&mut self.scheduler);
        }
        let discarded = self.scheduler.clear();
        if discarded > 0 {
            log::debug!("Discarded {} events scheduled after {}", discarded, self.scheduler.now());
        }
        self.trace.flush()?;

        let summary = RunSummary {
            simulated_s: self.scheduler.now().as_secs_f64(),
            events_dispatched: self.scheduler.dispatched(),
            events_discarded: discarded,
            packets_sent: self.network.packets_sent(),
            outcomes: self.trace.counts(),
            sinks: self
                .sinks
                .iter()
                .map(|s| SinkSummary {
                    node: s.node,
                    port: s.port,
                    packets: s.packets(),
                    bytes: s.bytes(),
                    last_received_s: s.last_received().map(SimTime::as_secs_f64),
                })
                .collect(),
        };
        log::info!(
            "Run finished: {} sent, {} delivered, {} dropped, {} collided",
            summary.packets_sent,
            summary.outcomes.delivered,
            summary.outcomes.dropped,
            summary.outcomes.collided
        );
        Ok(summary)
    }

    fn dispatch(&mut self, time: SimTime, event: SimEvent) -> SimResult<()> {
        match event {
            SimEvent::AppStart(id) => {
                if let Some(source) = self.sources.get_mut(id) {
                    source.on_start(&mut self.scheduler)?;
                }
            }
            SimEvent::AppStop(id) => {
                if let Some(source) = self.sources.get_mut(id) {
                    source.on_stop(&mut self.scheduler);
                }
            }
            SimEvent::AppToggle(id) => {
                if let Some(source) = self.sources.get_mut(id) {
                    source.on_toggle(&mut self.scheduler)?;
                }
            }
            SimEvent::AppSend(id) => {
                let emission = match self.sources.get_mut(id) {
                    Some(source) => source.on_send(&mut self.scheduler)?,
                    None => None,
                };
                if let Some(e) = emission {
                    self.network.send(e.device, e.local, e.remote, e.size, &mut self.scheduler, &mut self.trace)?;
                }
            }
            SimEvent::SinkStop(id) => {
                if let Some(sink) = self.sinks.get(id) {
                    if self.network.bound_sink(sink.node, sink.port) == Some(id) {
                        self.network.unbind(sink.node, sink.port);
                        log::debug!("sink on node {} port {} stopped at {}", sink.node, sink.port, time);
                    }
                }
            }
            SimEvent::MobilityChange(node) => {
                if let Some(next) = self.network.change_direction(node, time) {
                    self.scheduler.schedule_at(next, SimEvent::MobilityChange(node))?;
                }
            }
            SimEvent::MacAccess(device) => self.network.on_mac_access(device, &mut self.scheduler, &mut self.trace)?,
            SimEvent::TxEnd(device) => self.network.on_tx_end(device, &mut self.scheduler)?,
            SimEvent::RxEnd(reception) => {
                if let Some((sink, packet)) = self.network.on_rx_end(reception, time, &mut self.trace) {
                    if let Some(sink) = self.sinks.get_mut(sink) {
                        sink.receive(&packet, time);
                    }
                }
            }
            SimEvent::LinkArrival { device, packet } => {
                if let Some((sink, packet)) = self.network.on_link_arrival(device, packet, time, &mut self.trace) {
                    if let Some(sink) = self.sinks.get_mut(sink) {
                        sink.receive(&packet, time);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scenario::{FlowSpec, MobilityKind};
    use crate::simulation::geometry::Point;
    use crate::simulation::trace::{DropReason, PacketOutcome};
    use crate::simulation::types::LinkKind;

    fn flow(source: NodeId, destination: NodeId, start_s: f64, stop_s: f64) -> FlowSpec {
        FlowSpec {
            source,
            destination,
            port: None,
            rate_bps: None,
            packet_size: None,
            start_s: Some(start_s),
            stop_s: Some(stop_s),
            on_time_s: None,
            off_time_s: None,
        }
    }

    fn static_scenario(positions: Vec<Point>) -> Scenario {
        let mut scenario = Scenario::default();
        scenario.duration_s = 3.0;
        scenario.mesh.node_count = positions.len();
        scenario.mesh.positions = Some(positions);
        scenario.mesh.mobility = MobilityKind::Static;
        scenario.traffic.full_mesh = false;
        scenario
    }

    #[test]
    fn same_seed_same_records() {
        let mut scenario = Scenario::default();
        scenario.mesh.node_count = 4;
        scenario.duration_s = 3.0;
        let run = || {
            let mut sim = Simulator::from_scenario(&scenario).unwrap();
            sim.run().unwrap();
            sim.records().cloned().collect::<Vec<_>>()
        };
        let first = run();
        assert!(!first.is_empty());
        assert_eq!(first, run());
        assert!(first.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn simultaneous_senders_collide() {
        let mut scenario = static_scenario(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(-10.0, 0.0),
            Point::new(0.0, 10.0),
        ]);
        scenario.monitor.enabled = false;
        scenario.flows = (1..4).map(|s| flow(s, 0, 1.0, 1.01)).collect();
        let mut sim = Simulator::from_scenario(&scenario).unwrap();
        sim.run().unwrap();
        let records: Vec<_> = sim.records().collect();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.outcome == PacketOutcome::Collided));
        assert_eq!(sim.sinks()[0].packets(), 0);
    }

    #[test]
    fn synchronized_senders_recover_from_collisions() {
        let mut scenario = static_scenario(vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0), Point::new(-5.0, 0.0)]);
        scenario.monitor.enabled = false;
        scenario.flows = vec![flow(1, 0, 1.0, 2.0), flow(2, 0, 1.0, 2.0)];
        let mut sim = Simulator::from_scenario(&scenario).unwrap();
        sim.run().unwrap();
        let summary = sim.finish().unwrap();
        let outcomes = summary.outcomes;
        assert_eq!(summary.packets_sent, 244);
        assert_eq!(outcomes.delivered + outcomes.dropped + outcomes.collided, 244);
        // The first frames leave together and collide; backoff separates later ones.
        assert!(outcomes.collided > 0);
        assert!(outcomes.delivered >= 80, "only {} of 244 delivered", outcomes.delivered);
        assert_eq!(sim.sinks()[0].packets(), outcomes.delivered);
        assert_eq!(sim.sinks()[0].per_source().len(), 2);
    }

    #[test]
    fn lone_sender_is_delivered() {
        let mut scenario = static_scenario(vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)]);
        scenario.monitor.enabled = false;
        scenario.flows = vec![flow(1, 0, 1.0, 1.01)];
        let mut sim = Simulator::from_scenario(&scenario).unwrap();
        sim.run().unwrap();
        let record = sim.records().next().unwrap();
        assert_eq!(record.outcome, PacketOutcome::Delivered);
        assert_eq!(sim.sinks()[0].packets(), 1);
    }

    #[test]
    fn monitor_flow_over_point_to_point() {
        let mut scenario = static_scenario(vec![Point::new(0.0, 0.0), Point::new(50.0, 0.0)]);
        scenario.flows = vec![flow(0, 2, 1.0, 2.0)];
        let mut sim = Simulator::from_scenario(&scenario).unwrap();
        sim.run().unwrap();
        let summary = sim.finish().unwrap();
        assert_eq!(summary.packets_sent, 122);
        assert_eq!(summary.outcomes.delivered, 122);
        assert!(sim.records().all(|r| r.link == LinkKind::PointToPoint));
        let monitor_sink = sim.sinks().iter().find(|s| s.node == 2).unwrap();
        assert_eq!(monitor_sink.packets(), 122);
        assert_eq!(monitor_sink.bytes(), 122 * 512);
        assert_eq!(summary.simulated_s, 4.0);
    }

    #[test]
    fn down_device_drops_everything() {
        let mut scenario = static_scenario(vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0)]);
        scenario.flows = vec![flow(0, 1, 1.0, 1.1)];
        let mut sim = Simulator::from_scenario(&scenario).unwrap();
        sim.set_device_up(0, false).unwrap();
        sim.run().unwrap();
        assert!(sim.records().count() > 0);
        assert!(sim.records().all(|r| r.reason == Some(DropReason::DeviceDown)));
        assert_eq!(sim.sinks()[1].packets(), 0);
    }

    #[test]
    fn hard_stop_discards_later_events() {
        let scenario = Scenario {
            duration_s: 2.0,
            drain_s: 0.5,
            ..Scenario::default()
        };
        let mut sim = Simulator::from_scenario(&scenario).unwrap();
        sim.run_until(SimTime::from_secs(1)).unwrap();
        assert_eq!(sim.now(), SimTime::from_secs(1));
        sim.run_until(SimTime::from_secs(60)).unwrap();
        assert_eq!(sim.now(), SimTime::from_millis(2500));
        assert!(sim.records().all(|r| r.timestamp <= SimTime::from_millis(2500)));
        let summary = sim.finish().unwrap();
        // Mobility changes keep going past the stop time.
        assert!(summary.events_discarded > 0);
    }

    #[test]
    fn cancelling_twice_is_a_no_op() {
        let mut sim = Simulator::from_scenario(&Scenario::default()).unwrap();
        let handle = sim.schedule(SimTime::from_millis(10), SimEvent::MobilityChange(0)).unwrap();
        assert!(sim.cancel(handle));
        assert!(!sim.cancel(handle));
        assert!(sim.schedule(SimTime::from_nanos(-5), SimEvent::MobilityChange(0)).is_err());
    }

    #[test]
    fn invalid_scenario_is_rejected() {
        let mut scenario = Scenario::default();
        scenario.traffic.rate_bps = 0.0;
        assert!(matches!(Simulator::from_scenario(&scenario), Err(SimError::InvalidConfig(_))));
    }
}
