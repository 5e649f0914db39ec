//! Error taxonomy for the simulation engine.
//!
//! Only setup and scheduling problems are errors. Packets that fail to arrive
//! are modeled outcomes and end up in the trace instead.

use thiserror::Error;

use crate::simulation::clock::SimTime;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Malformed topology, channel or flow parameters, detected before the run starts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An event was scheduled with a negative delay or for an instant already in the past.
    #[error("invalid schedule: event at {requested} requested while clock is at {now}")]
    InvalidSchedule { requested: SimTime, now: SimTime },
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::InvalidConfig(msg.into())
    }

    /// Process exit code reported by the command line entry point.
    pub fn exit_code(&self) -> u8 {
        match self {
            SimError::InvalidConfig(_) => 2,
            SimError::InvalidSchedule { .. } => 3,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
