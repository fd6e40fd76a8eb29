//! Simulator error types

use fanq_core::CoreError;
use fanq_query::QueryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid batch: {0}")]
    Batch(#[from] QueryError),

    #[error("Histogram error: {0}")]
    Histogram(String),
}

impl From<CoreError> for SimError {
    fn from(e: CoreError) -> Self {
        SimError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
