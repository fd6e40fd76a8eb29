//! Simulated multi-region metrics API for driving the fan-out executor.
//!
//! Each configured region answers after a simulated latency with
//! deterministic series, or misbehaves according to its failure mode:
//! request rejection, transport error, client error, or a panic during the
//! call. Runs produce a report of every batch plus the executor counters.
//!
//! # Usage
//! ```bash
//! # Built-in three-region scenario with one panicking region
//! fanq-sim demo
//!
//! # Scenario from a TOML file, JSON report on stdout
//! fanq-sim run --config scenario.toml --json
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod report;
pub mod workload;

pub use backend::SimBackend;
pub use config::{FailureMode, RegionSettings, SimConfig};
pub use error::{Result, SimError};
pub use report::Report;
pub use workload::{build_batch, run_batch};
