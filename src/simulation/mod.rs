//! Discrete-event simulation core.
//!
//! This module provides the complete simulation engine for a wireless mesh
//! with a wired monitor. It integrates:
//! - A time-ordered event queue driving one logical clock
//! - Mobility models evaluated on demand
//! - A log-distance wireless channel with carrier sense and collisions
//! - CSMA/CA medium access with binary exponential backoff
//! - Static IPv4 addressing over wireless and point-to-point devices
//! - On/off traffic sources, packet sinks and per-packet tracing
//!
//! ## Module Organization
//!
//! - `clock`, `scheduler`: simulated time and the event queue
//! - `geometry`, `mobility`: positions and how they change
//! - `signal_calculations`, `channel`: link budget, airtime, wireless medium, wired links
//! - `mac`: contention on wireless devices
//! - `network`: addressing, routing, delivery
//! - `application`: sources and sinks
//! - `trace`: packet records and writers
//! - `topology`: builders turning a scenario into components
//! - `engine`: the `Simulator` and its dispatch loop
//!
//! ## Public API
//!
//! The main entry point is [`Simulator::from_scenario`] followed by
//! [`Simulator::run`] and [`Simulator::finish`].

pub mod application;
pub mod channel;
pub mod clock;
pub mod engine;
pub mod events;
pub mod geometry;
pub mod mac;
pub mod mobility;
pub mod network;
pub mod scheduler;
pub mod signal_calculations;
pub mod topology;
pub mod trace;
pub mod types;

pub use clock::SimTime;
pub use engine::{RunSummary, Simulator};
pub use events::SimEvent;
pub use geometry::Point;
pub use trace::{PacketOutcome, PacketRecord};

/// Derive an independent RNG seed from the scenario seed and a salt (splitmix64).
///
/// Each random consumer (a node's walk, a device's backoff) gets its own
/// stream, so the draws one node makes never shift another node's sequence.
pub fn derive_seed(seed: u64, salt: u64) -> u64 {
    let mut z = seed ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
