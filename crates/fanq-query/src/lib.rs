//! fanq Query - Region fan-out execution engine for metric queries
//!
//! This crate provides:
//! - Query model and batch validation
//! - Region partitioning
//! - The `MetricsBackend` collaborator trait
//! - Concurrent per-region execution with fault isolation

pub mod backend;
pub mod error;
pub mod executor;
pub mod model;
pub mod partition;
pub mod stats;

pub use backend::MetricsBackend;
pub use error::{BoxError, CallError, QueryError, Result};
pub use executor::{FanOutExecutor, TaskState};
pub use model::{ExecutionContext, MetricQuery, MetricQueryBuilder, QueryDataResponse, Statistic, TaggedResult};
pub use partition::{partition, PartitionedBatch, RegionGroups};
pub use stats::{ExecutorStats, StatsSnapshot};
