//! fanq Core - Core types for the region fan-out query engine
//!
//! This crate provides the fundamental data types shared by the engine and
//! its backends:
//! - `QueryId`: Per-batch query identifier (empty for task-level faults)
//! - `Region`: Target region of a remote metrics API
//! - `TimeRange`: Millisecond range shared by every query in a batch
//! - `Frame` / `DataResponse`: Per-query results or embedded errors
//! - `ExecutionConfig`: Executor settings

pub mod config;
pub mod error;
pub mod types;

pub use config::ExecutionConfig;
pub use error::{CoreError, Result};
pub use types::*;
