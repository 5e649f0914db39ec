//! Mesh radio simulator CLI.
//!
//! Runs one scenario to completion, optionally writing packet traces, and
//! prints the run summary.

use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use mesh_radio_simulator::SimError;
use mesh_radio_simulator::common::scenario::{Scenario, load_scenario};
use mesh_radio_simulator::simulation::Simulator;
use mesh_radio_simulator::simulation::trace::{AsciiTraceWriter, JsonLinesTraceWriter};

#[derive(Parser, Debug)]
#[command(name = "mesh-radio-simulator", version, about = "Discrete-event simulator for a mobile wireless mesh")]
struct Args {
    /// Scenario file (JSON, or TOML with a .toml extension). Defaults to the built-in ten-node mesh.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Override the number of mesh nodes
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Override the traffic duration in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Override the master seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Write a line-oriented packet trace to this file
    #[arg(long)]
    ascii_trace: Option<PathBuf>,

    /// Write a JSON-lines packet trace to this file
    #[arg(long)]
    json_trace: Option<PathBuf>,

    /// Do not install the full mesh of flows, only explicit ones
    #[arg(long)]
    no_full_mesh: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn create_trace_file(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create trace file: {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn run(args: &Args) -> anyhow::Result<()> {
    let mut scenario = match &args.scenario {
        Some(path) => load_scenario(path)?,
        None => Scenario::default(),
    };
    if let Some(nodes) = args.nodes {
        scenario.mesh.node_count = nodes;
    }
    if let Some(duration) = args.duration {
        scenario.duration_s = duration;
    }
    if let Some(seed) = args.seed {
        scenario.seed = seed;
    }
    if args.no_full_mesh {
        scenario.traffic.full_mesh = false;
    }

    let mut simulator = Simulator::from_scenario(&scenario)?;
    if let Some(path) = &args.ascii_trace {
        simulator.attach_trace_sink(Box::new(AsciiTraceWriter::new(create_trace_file(path)?)));
        info!("Writing ASCII trace to {}", path.display());
    }
    if let Some(path) = &args.json_trace {
        simulator.attach_trace_sink(Box::new(JsonLinesTraceWriter::new(create_trace_file(path)?)));
        info!("Writing JSON-lines trace to {}", path.display());
    }

    simulator.run()?;
    let summary = simulator.finish().context("Failed to flush trace output")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let crate_level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter(Some("mesh_radio_simulator"), crate_level)
        .init();

    info!("Starting up at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:#}", err);
            let code = err.downcast_ref::<SimError>().map(SimError::exit_code).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
