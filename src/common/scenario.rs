//! Scenario loading, parsing, and validation logic.
//!
//! A scenario describes the whole run: the mesh nodes and their mobility, the
//! optional monitor node, channel and MAC parameters, traffic defaults and any
//! explicit flows. Every field has a default, so an empty file reproduces the
//! reference ten-node mesh. Files are JSON unless the extension is `.toml`.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::simulation::channel::LinkParameters;
use crate::simulation::clock::SimTime;
use crate::simulation::geometry::{Point, Rectangle};
use crate::simulation::mac::MacParameters;
use crate::simulation::signal_calculations::PhyParameters;
use crate::simulation::types::NodeId;

/// Largest node count that still fits the address plan (one /24 host per node).
pub const MAX_MESH_NODES: usize = 254;
/// Largest UDP payload carried by one datagram.
pub const MAX_PACKET_SIZE: usize = 65_507;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioFormat {
    Json,
    Toml,
}

impl ScenarioFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ScenarioFormat::Toml,
            _ => ScenarioFormat::Json,
        }
    }
}

/// Where mesh nodes start.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Every node at the field origin (0, 0), clamped into the field.
    Origin,
    /// Uniformly random inside the field, drawn from the scenario seed.
    Uniform,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MobilityKind {
    RandomWalk,
    Static,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MeshConfig {
    pub node_count: usize,
    pub placement: Placement,
    /// Explicit start positions; overrides `placement` when present.
    pub positions: Option<Vec<Point>>,
    pub mobility: MobilityKind,
    pub speed_min_mps: f64,
    pub speed_max_mps: f64,
    pub direction_change_s: f64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_count: 10,
            placement: Placement::Origin,
            positions: None,
            mobility: MobilityKind::RandomWalk,
            speed_min_mps: 2.0,
            speed_max_mps: 4.0,
            direction_change_s: 1.0,
        }
    }
}

/// Stationary node wired to every mesh node.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub position: Point,
    pub sink_port: u16,
    pub link: LinkParameters,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            position: Point::ORIGIN,
            sink_port: 9999,
            link: LinkParameters::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TrafficDefaults {
    /// Install a flow from every mesh node to every other one.
    pub full_mesh: bool,
    /// Mesh node `i` listens on `base_port + i`.
    pub base_port: u16,
    pub rate_bps: f64,
    pub packet_size: usize,
    pub start_s: f64,
    /// Defaults to the scenario duration.
    pub stop_s: Option<f64>,
    /// Length of On periods; absent means always On.
    pub on_time_s: Option<f64>,
    pub off_time_s: f64,
}

impl Default for TrafficDefaults {
    fn default() -> Self {
        Self {
            full_mesh: true,
            base_port: 9,
            rate_bps: 500_000.0,
            packet_size: 512,
            start_s: 1.0,
            stop_s: None,
            on_time_s: None,
            off_time_s: 0.0,
        }
    }
}

/// One explicit flow. Missing fields fall back to the traffic defaults.
///
/// Node ids `0..node_count` are mesh nodes; `node_count` is the monitor.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FlowSpec {
    pub source: NodeId,
    pub destination: NodeId,
    pub port: Option<u16>,
    pub rate_bps: Option<f64>,
    pub packet_size: Option<usize>,
    pub start_s: Option<f64>,
    pub stop_s: Option<f64>,
    pub on_time_s: Option<f64>,
    pub off_time_s: Option<f64>,
}

/// A flow with every parameter resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPlan {
    pub source: NodeId,
    pub destination: NodeId,
    pub port: u16,
    pub rate_bps: f64,
    pub packet_size: usize,
    pub start_s: f64,
    pub stop_s: f64,
    pub on_time_s: Option<f64>,
    pub off_time_s: f64,
}

impl FlowPlan {
    pub fn start(&self) -> SimTime {
        SimTime::from_secs_f64(self.start_s)
    }

    pub fn stop(&self) -> SimTime {
        SimTime::from_secs_f64(self.stop_s)
    }

    pub fn on_time(&self) -> Option<SimTime> {
        self.on_time_s.map(SimTime::from_secs_f64)
    }

    pub fn off_time(&self) -> SimTime {
        SimTime::from_secs_f64(self.off_time_s)
    }
}

/// Root structure representing the entire scenario.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Scenario {
    pub seed: u64,
    /// Traffic runs until this time; sinks on mesh nodes stop here too.
    pub duration_s: f64,
    /// Extra time after `duration_s` for frames still in flight.
    pub drain_s: f64,
    pub field: Rectangle,
    pub mesh: MeshConfig,
    pub monitor: MonitorConfig,
    pub phy: PhyParameters,
    pub mac: MacParameters,
    pub traffic: TrafficDefaults,
    pub flows: Vec<FlowSpec>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            seed: 1,
            duration_s: 100.0,
            drain_s: 1.0,
            field: Rectangle::default(),
            mesh: MeshConfig::default(),
            monitor: MonitorConfig::default(),
            phy: PhyParameters::default(),
            mac: MacParameters::default(),
            traffic: TrafficDefaults::default(),
            flows: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn duration(&self) -> SimTime {
        SimTime::from_secs_f64(self.duration_s)
    }

    /// Hard stop of the run.
    pub fn stop_time(&self) -> SimTime {
        SimTime::from_secs_f64(self.duration_s + self.drain_s)
    }

    pub fn monitor_id(&self) -> Option<NodeId> {
        self.monitor.enabled.then_some(self.mesh.node_count as NodeId)
    }

    /// Mesh nodes plus the monitor, if any.
    pub fn total_nodes(&self) -> usize {
        self.mesh.node_count + usize::from(self.monitor.enabled)
    }

    /// Port a node listens on unless a flow says otherwise.
    pub fn default_port(&self, node: NodeId) -> u16 {
        if Some(node) == self.monitor_id() {
            self.monitor.sink_port
        } else {
            self.traffic.base_port.saturating_add(node.min(u16::MAX as u32) as u16)
        }
    }

    /// Every flow to install: the full mesh (if enabled) followed by the explicit flows.
    pub fn flow_plans(&self) -> Vec<FlowPlan> {
        let defaults = &self.traffic;
        let stop_s = defaults.stop_s.unwrap_or(self.duration_s);
        let mut plans = Vec::new();
        if defaults.full_mesh {
            let n = self.mesh.node_count as NodeId;
            for source in 0..n {
                for destination in (0..n).filter(|d| *d != source) {
                    plans.push(FlowPlan {
                        source,
                        destination,
                        port: self.default_port(destination),
                        rate_bps: defaults.rate_bps,
                        packet_size: defaults.packet_size,
                        start_s: defaults.start_s,
                        stop_s,
                        on_time_s: defaults.on_time_s,
                        off_time_s: defaults.off_time_s,
                    });
                }
            }
        }
        for flow in &self.flows {
            plans.push(FlowPlan {
                source: flow.source,
                destination: flow.destination,
                port: flow.port.unwrap_or_else(|| self.default_port(flow.destination)),
                rate_bps: flow.rate_bps.unwrap_or(defaults.rate_bps),
                packet_size: flow.packet_size.unwrap_or(defaults.packet_size),
                start_s: flow.start_s.unwrap_or(defaults.start_s),
                stop_s: flow.stop_s.unwrap_or(stop_s),
                on_time_s: flow.on_time_s.or(defaults.on_time_s),
                off_time_s: flow.off_time_s.unwrap_or(defaults.off_time_s),
            });
        }
        plans
    }
}

/// Parse scenario text without validating it.
pub fn parse_scenario(text: &str, format: ScenarioFormat) -> SimResult<Scenario> {
    match format {
        ScenarioFormat::Json => serde_json::from_str(text).map_err(|e| SimError::config(format!("Failed to parse JSON: {}", e))),
        ScenarioFormat::Toml => toml::from_str(text).map_err(|e| SimError::config(format!("Failed to parse TOML: {}", e))),
    }
}

/// Load a scenario from a file and validate it.
///
/// # Returns
///
/// The validated scenario. Read failures are plain I/O errors with context;
/// parse and validation failures carry a `SimError::InvalidConfig`.
pub fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let data = fs::read_to_string(path).with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
    let scenario = parse_scenario(&data, ScenarioFormat::from_path(path))?;
    validate_scenario(&scenario).map_err(SimError::InvalidConfig)?;
    log::info!(
        "Loaded scenario {} ({} mesh nodes, {} s)",
        path.display(),
        scenario.mesh.node_count,
        scenario.duration_s
    );
    Ok(scenario)
}

fn check_positive(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("Invalid {}, must be positive (got {})", name, value));
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Invalid {}, must be non-negative (got {})", name, value));
    }
    Ok(())
}

/// Validate scenario configuration.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scenario(scenario: &Scenario) -> Result<(), String> {
    const MIN_TX_POWER: f64 = -50.0;
    const MAX_TX_POWER: f64 = 50.0;
    const MAX_CONTENTION_WINDOW: u32 = 65_535;
    const MAX_MAC_INTERVAL_US: i64 = 1_000_000;

    check_positive("duration_s", scenario.duration_s)?;
    check_non_negative("drain_s", scenario.drain_s)?;

    // Field
    let field = &scenario.field;
    if !field.is_well_formed() || field.width() <= 0.0 || field.height() <= 0.0 {
        return Err(format!(
            "Field [{}, {}] x [{}, {}] is empty or malformed",
            field.min_x, field.max_x, field.min_y, field.max_y
        ));
    }

    // Mesh
    let mesh = &scenario.mesh;
    if mesh.node_count == 0 {
        return Err("Scenario must contain at least one mesh node".to_string());
    }
    if mesh.node_count > MAX_MESH_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", mesh.node_count, MAX_MESH_NODES));
    }
    if let Some(positions) = &mesh.positions {
        if positions.len() != mesh.node_count {
            return Err(format!(
                "{} positions given for {} mesh nodes",
                positions.len(),
                mesh.node_count
            ));
        }
        for (idx, p) in positions.iter().enumerate() {
            if !field.contains(p) {
                return Err(format!("Node {} position ({}, {}) lies outside the field", idx, p.x, p.y));
            }
        }
    }
    if mesh.mobility == MobilityKind::RandomWalk {
        check_non_negative("speed_min_mps", mesh.speed_min_mps)?;
        check_positive("speed_max_mps", mesh.speed_max_mps)?;
        if mesh.speed_min_mps > mesh.speed_max_mps {
            return Err(format!(
                "Invalid speed range: min {} exceeds max {}",
                mesh.speed_min_mps, mesh.speed_max_mps
            ));
        }
        check_positive("direction_change_s", mesh.direction_change_s)?;
    }

    // Monitor
    if scenario.monitor.enabled {
        let p = &scenario.monitor.position;
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err("Monitor position must be finite".to_string());
        }
        check_positive("monitor link data_rate_bps", scenario.monitor.link.data_rate_bps)?;
        check_non_negative("monitor link delay_ms", scenario.monitor.link.delay_ms)?;
    }

    // Channel
    let phy = &scenario.phy;
    if !(MIN_TX_POWER..=MAX_TX_POWER).contains(&phy.tx_power_dbm) {
        return Err(format!(
            "tx_power_dbm {} outside realistic range ({} to {} dBm)",
            phy.tx_power_dbm, MIN_TX_POWER, MAX_TX_POWER
        ));
    }
    for (name, value) in [
        ("tx_gain_db", phy.tx_gain_db),
        ("rx_gain_db", phy.rx_gain_db),
        ("noise_figure_db", phy.noise_figure_db),
        ("cca_threshold_dbm", phy.cca_threshold_dbm),
        ("reference_loss_db", phy.reference_loss_db),
        ("min_snr_db", phy.min_snr_db),
    ] {
        if !value.is_finite() {
            return Err(format!("Invalid {}, must be finite", name));
        }
    }
    check_positive("path_loss_exponent", phy.path_loss_exponent)?;
    check_positive("reference_distance_m", phy.reference_distance_m)?;
    check_positive("bandwidth_hz", phy.bandwidth_hz)?;
    check_positive("propagation_speed_mps", phy.propagation_speed_mps)?;
    check_positive("phy_rate_bps", phy.phy_rate_bps)?;
    check_non_negative("preamble_us", phy.preamble_us)?;

    // MAC
    let mac = &scenario.mac;
    if mac.slot_us <= 0 || mac.slot_us > MAX_MAC_INTERVAL_US {
        return Err(format!("Invalid slot_us {}, must be 1-{}", mac.slot_us, MAX_MAC_INTERVAL_US));
    }
    if mac.difs_us < 0 || mac.difs_us > MAX_MAC_INTERVAL_US {
        return Err(format!("Invalid difs_us {}, must be 0-{}", mac.difs_us, MAX_MAC_INTERVAL_US));
    }
    if mac.cw_min > mac.cw_max {
        return Err(format!("Invalid contention window: cw_min {} exceeds cw_max {}", mac.cw_min, mac.cw_max));
    }
    if mac.cw_max > MAX_CONTENTION_WINDOW {
        return Err(format!("Invalid cw_max {}, must not exceed {} slots", mac.cw_max, MAX_CONTENTION_WINDOW));
    }
    if mac.queue_capacity == 0 {
        return Err("Invalid queue_capacity, must be at least 1".to_string());
    }

    // Ports
    let highest_port = scenario.traffic.base_port as usize + mesh.node_count - 1;
    if highest_port > u16::MAX as usize {
        return Err(format!("base_port {} leaves no room for {} sinks", scenario.traffic.base_port, mesh.node_count));
    }

    // Flows
    let total = scenario.total_nodes() as NodeId;
    for (idx, flow) in scenario.flow_plans().iter().enumerate() {
        if flow.source >= total || flow.destination >= total {
            return Err(format!(
                "Flow {} references node {} -> {}, but only {} nodes exist",
                idx, flow.source, flow.destination, total
            ));
        }
        if flow.source == flow.destination {
            return Err(format!("Flow {} sends from node {} to itself", idx, flow.source));
        }
        check_positive("flow rate_bps", flow.rate_bps).map_err(|e| format!("Flow {}: {}", idx, e))?;
        if flow.packet_size == 0 || flow.packet_size > MAX_PACKET_SIZE {
            return Err(format!("Flow {}: packet_size {} must be 1-{}", idx, flow.packet_size, MAX_PACKET_SIZE));
        }
        check_non_negative("flow start_s", flow.start_s).map_err(|e| format!("Flow {}: {}", idx, e))?;
        if !flow.stop_s.is_finite() || flow.start_s > flow.stop_s {
            return Err(format!("Flow {}: start {} s is after stop {} s", idx, flow.start_s, flow.stop_s));
        }
        if let Some(on) = flow.on_time_s {
            check_positive("flow on_time_s", on).map_err(|e| format!("Flow {}: {}", idx, e))?;
        }
        check_non_negative("flow off_time_s", flow.off_time_s).map_err(|e| format!("Flow {}: {}", idx, e))?;
    }

    Ok(())
}
