//! Remote metrics backend
//!
//! The executor drives one region's queries through the stages of a
//! [`MetricsBackend`]: resolve a client, translate, build the request,
//! execute it, parse the response, and shape per-query results. Only
//! `execute` does I/O; everything else is synchronous.

use crate::error::{BoxError, CallError};
use crate::model::{ExecutionContext, MetricQuery};
use async_trait::async_trait;
use fanq_core::{DataResponse, QueryId, Region, TimeRange};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Collaborators consumed by the fan-out executor for a single region call.
///
/// Implementations must be shareable across region tasks. Associated types
/// are task-local: a client, the native queries and the request built for
/// one region never leave that region's task.
#[async_trait]
pub trait MetricsBackend: Send + Sync + 'static {
    /// Authenticated client handle for one region
    type Client: Send + Sync;
    /// Provider-native form of a query
    type NativeQuery: Send + Sync;
    /// Request payload for one remote call
    type Request: Send;
    /// Raw response payload
    type Response: Send;
    /// Parsed result set for one native query
    type ResultSet: Send;

    /// Resolve a client for `region` using the caller's context.
    fn resolve_client(&self, region: &Region, ctx: &ExecutionContext) -> Result<Self::Client, BoxError>;

    /// Translate a region's queries into provider-native queries.
    fn translate(&self, queries: &[MetricQuery]) -> Result<Vec<Self::NativeQuery>, BoxError>;

    /// Build one request covering `time_range` and all native queries.
    fn build_request(
        &self,
        time_range: &TimeRange,
        queries: &[Self::NativeQuery],
    ) -> Result<Self::Request, BoxError>;

    /// Perform the remote call.
    ///
    /// May retry internally. Should return promptly once `cancel` fires; the
    /// executor also stops waiting on its own when that happens.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        client: &Self::Client,
        request: Self::Request,
    ) -> Result<Self::Response, CallError>;

    /// Parse a response into one result set per native query.
    fn parse(
        &self,
        response: Self::Response,
        queries: &[Self::NativeQuery],
    ) -> Result<Vec<Self::ResultSet>, BoxError>;

    /// Shape parsed result sets into final per-query entries.
    ///
    /// A failure of an individual query may be reported as
    /// [`DataResponse::error`] for that query instead of failing the region.
    fn shape(
        &self,
        results: Vec<Self::ResultSet>,
        queries: &[MetricQuery],
        time_range: &TimeRange,
    ) -> Result<HashMap<QueryId, DataResponse>, BoxError>;
}
