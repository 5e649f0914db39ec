//! Discrete-event simulator for a mobile wireless mesh with a wired monitor node.
//!
//! Load a [`common::scenario::Scenario`], build a [`simulation::Simulator`]
//! from it, run it and read the packet records or the run summary.

pub mod common;
pub mod error;
pub mod simulation;

pub use error::{SimError, SimResult};
