//! Error types for fanq-core

use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid time range: start {start} >= end {end}")]
    InvalidTimeRange { start: i64, end: i64 },

    #[error("Empty tag key")]
    EmptyTagKey,

    #[error("Frame has {timestamps} timestamps but {values} values")]
    MisalignedFrame { timestamps: usize, values: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<toml::de::Error> for CoreError {
    fn from(e: toml::de::Error) -> Self {
        CoreError::Configuration(e.to_string())
    }
}
