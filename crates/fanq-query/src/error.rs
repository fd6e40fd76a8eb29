//! Query error types

use fanq_core::{CoreError, Region};
use thiserror::Error;

/// Boxed error returned by backend collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of the remote call itself
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote service received the request and rejected it
    #[error("request failed with status {status_code} (request id {request_id}): {message}")]
    RequestFailure {
        status_code: u16,
        request_id: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("call cancelled")]
    Cancelled,
}

/// Query errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid time range: start {start} >= end {end}")]
    InvalidTimeRange { start: i64, end: i64 },

    #[error("Client resolution failed for region {region}: {source}")]
    ClientResolution {
        region: Region,
        #[source]
        source: BoxError,
    },

    #[error("Query translation failed for region {region}: {source}")]
    Translation {
        region: Region,
        #[source]
        source: BoxError,
    },

    #[error("Request build failed for region {region}: {source}")]
    Build {
        region: Region,
        #[source]
        source: BoxError,
    },

    #[error("Metric request failed for region {region}: {source}")]
    Call {
        region: Region,
        #[source]
        source: CallError,
    },

    #[error("Response parse failed for region {region}: {source}")]
    Parse {
        region: Region,
        #[source]
        source: BoxError,
    },

    #[error("Result shaping failed for region {region}: {source}")]
    Shape {
        region: Region,
        #[source]
        source: BoxError,
    },

    #[error("Execution fault in region {region}: {message}")]
    RecoveredFault { region: Region, message: String },

    #[error("Query timeout: exceeded {0} seconds")]
    Timeout(u64),

    #[error("Query cancelled")]
    Cancelled,
}

impl QueryError {
    /// True for errors raised before any task is spawned
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidQuery(_) | QueryError::InvalidTimeRange { .. }
        )
    }

    /// True when the remote service rejected the request
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            QueryError::Call {
                source: CallError::RequestFailure { .. },
                ..
            }
        )
    }

    /// The region whose task produced this error, if any
    pub fn region(&self) -> Option<&Region> {
        match self {
            QueryError::ClientResolution { region, .. }
            | QueryError::Translation { region, .. }
            | QueryError::Build { region, .. }
            | QueryError::Call { region, .. }
            | QueryError::Parse { region, .. }
            | QueryError::Shape { region, .. }
            | QueryError::RecoveredFault { region, .. } => Some(region),
            _ => None,
        }
    }
}

/// Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

impl From<CoreError> for QueryError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidTimeRange { start, end } => QueryError::InvalidTimeRange { start, end },
            other => QueryError::InvalidQuery(other.to_string()),
        }
    }
}
