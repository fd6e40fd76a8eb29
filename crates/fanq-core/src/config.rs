//! Fan-out execution configuration.
//!
//! Controls the batch deadline and how task-level faults are surfaced.
//! Concurrency itself is not bounded here: one task is spawned per region
//! present in a batch, and limiting that is left to the caller.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the fan-out query executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Deadline for a whole batch in seconds.
    /// Set to 0 to wait indefinitely.
    /// Default: 0
    pub query_timeout_secs: u64,

    /// Emit a synthetic fault result summarizing a remote-service request
    /// failure before the batch error is returned.
    /// Default: true
    pub emit_request_failure_fault: bool,

    /// Log fault results that have no query identifier to be stored under.
    /// Default: true
    pub log_dropped_faults: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 0,
            emit_request_failure_fault: true,
            log_dropped_faults: true,
        }
    }
}

impl ExecutionConfig {
    /// Creates a new ExecutionConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::Configuration(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Returns the batch deadline, if one is configured.
    pub fn query_timeout(&self) -> Option<Duration> {
        if self.query_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.query_timeout_secs))
        }
    }

    /// Builder method to set the batch deadline.
    pub fn with_query_timeout_secs(mut self, secs: u64) -> Self {
        self.query_timeout_secs = secs;
        self
    }

    /// Builder method to toggle the request-failure fault result.
    pub fn with_request_failure_fault(mut self, emit: bool) -> Self {
        self.emit_request_failure_fault = emit;
        self
    }

    /// Builder method to toggle logging of dropped faults.
    pub fn with_log_dropped_faults(mut self, log: bool) -> Self {
        self.log_dropped_faults = log;
        self
    }
}
