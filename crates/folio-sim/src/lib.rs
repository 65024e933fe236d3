//! Folio Sim - seeded session simulator
//!
//! Runs a workspace session against the in-memory fake API and reports
//! whether the engine's invariants held. The `folio-sim` binary wraps
//! [`run_simulator`] with a command line.

#![warn(missing_docs)]

pub mod simulator;

pub use simulator::{run_simulator, InvariantCheck, SimulatedOperation, SimulatorConfig, SimulatorReport, SimulatorStats};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
