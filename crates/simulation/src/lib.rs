//! Deterministic simulation for favobft.
//!
//! Runs a whole validator network in one thread on simulated time. Every
//! node owns a [`favo_bft::BftState`], its own chain store, validator-set
//! manager and executor. Given the same seed, a run produces identical
//! results, which makes failures replayable.
//!
//! - [`SimulationRunner`]: global event queue, action processing
//! - [`SimulatedNetwork`]: latency, jitter, packet loss, partitions
//! - [`SimExecutor`]: hashing stand-in for state execution

mod event_queue;
mod executor;
mod network;
mod runner;

/// Index of a node in the simulation.
pub type NodeIndex = u32;

pub use event_queue::EventKey;
pub use executor::SimExecutor;
pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{NodeStatus, RestartError, SimulationRunner, SimulationStats};
