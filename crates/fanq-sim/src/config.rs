//! Configuration structs for the simulator.

use crate::error::{Result, SimError};
use fanq_core::ExecutionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a simulated region misbehaves once its request reaches the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureMode {
    /// Answers every query
    #[default]
    Healthy,

    /// The API rejects the request
    RequestFailure { status_code: u16, message: String },

    /// The connection drops before an answer arrives
    Transport { message: String },

    /// No client can be built for the region
    ClientError { message: String },

    /// The region's task panics mid-call
    Panic { message: String },
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::Healthy => "healthy",
            FailureMode::RequestFailure { .. } => "request-failure",
            FailureMode::Transport { .. } => "transport",
            FailureMode::ClientError { .. } => "client-error",
            FailureMode::Panic { .. } => "panic",
        }
    }
}

impl std::fmt::Display for FailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One simulated region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSettings {
    /// Region name, e.g. "us-east-1"
    pub name: String,

    /// Queries generated for this region per batch
    #[serde(default = "default_queries")]
    pub queries: usize,

    /// Base latency of the simulated call
    #[serde(default)]
    pub latency_ms: u64,

    /// Upper bound of the random latency added on top of the base
    #[serde(default)]
    pub jitter_ms: u64,

    #[serde(default)]
    pub failure: FailureMode,
}

fn default_queries() -> usize {
    1
}

impl RegionSettings {
    pub fn new(name: impl Into<String>, queries: usize) -> Self {
        Self {
            name: name.into(),
            queries,
            latency_ms: 0,
            jitter_ms: 0,
            failure: FailureMode::Healthy,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64, jitter_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_failure(mut self, failure: FailureMode) -> Self {
        self.failure = failure;
        self
    }
}

/// Main configuration for the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for series values, latency jitter and request ids
    pub seed: u64,

    /// Number of batches to run
    pub iterations: usize,

    /// Length of the queried window, ending at `end_ms`
    pub range_secs: u64,

    /// End of the queried window. Defaults to the current time.
    pub end_ms: Option<i64>,

    /// Aggregation period of every generated query
    pub period_secs: u32,

    /// Region that `default` queries are routed to
    pub default_region: Option<String>,

    /// Executor settings
    pub engine: ExecutionConfig,

    pub regions: Vec<RegionSettings>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            iterations: 1,
            range_secs: 3600,
            end_ms: None,
            period_secs: 60,
            default_region: None,
            engine: ExecutionConfig::default(),
            regions: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Three regions: two healthy with different latencies, one that
    /// panics during its call.
    pub fn demo() -> Self {
        Self {
            regions: vec![
                RegionSettings::new("us-east-1", 2).with_latency(40, 20),
                RegionSettings::new("eu-west-1", 1).with_latency(80, 40),
                RegionSettings::new("ap-southeast-2", 2)
                    .with_latency(20, 0)
                    .with_failure(FailureMode::Panic {
                        message: "simulated decoder crash".to_string(),
                    }),
            ],
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(SimError::Config("at least one region is required".to_string()));
        }
        if self.iterations == 0 {
            return Err(SimError::Config("iterations must be at least 1".to_string()));
        }
        if self.range_secs == 0 {
            return Err(SimError::Config("range_secs must be positive".to_string()));
        }
        if self.period_secs == 0 {
            return Err(SimError::Config("period_secs must be positive".to_string()));
        }
        for region in &self.regions {
            if region.name.is_empty() {
                return Err(SimError::Config("region name must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Total queries in one batch
    pub fn query_count(&self) -> usize {
        self.regions.iter().map(|r| r.queries).sum()
    }
}
