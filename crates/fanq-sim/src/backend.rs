//! In-process simulated metrics API.
//!
//! Each configured region answers with deterministic series derived from
//! the seed and the query's identity, after a simulated network latency.
//! A region's [`FailureMode`] decides whether the call succeeds.

use crate::config::{FailureMode, RegionSettings};
use async_trait::async_trait;
use fanq_core::{compute_fingerprint, DataResponse, Frame, QueryId, Region, Tag, TimeRange, Timestamp};
use fanq_query::{BoxError, CallError, ExecutionContext, MetricQuery, MetricsBackend, Statistic};
use rand::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Queries accepted in a single request
pub const MAX_QUERIES_PER_REQUEST: usize = 500;

/// Datapoints a single request may return across all queries
pub const MAX_DATAPOINTS_PER_REQUEST: usize = 100_800;

/// Connection to one simulated region
#[derive(Debug, Clone)]
pub struct SimClient {
    pub region: Region,
    pub settings: RegionSettings,
}

/// A query in the simulated API's own form
#[derive(Debug, Clone)]
pub struct SimQuery {
    pub id: QueryId,
    pub label: String,
    pub statistic: Statistic,
    pub period_ms: i64,
    /// Seed of the generated series
    pub series_seed: u64,
    /// Labels attached to the returned frame
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone)]
pub struct SimRequest {
    pub time_range: TimeRange,
    pub queries: Vec<SimQuery>,
}

#[derive(Debug, Clone)]
pub struct SimSeries {
    pub id: QueryId,
    pub timestamps: Vec<Timestamp>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct SimResponse {
    pub request_id: String,
    pub series: Vec<SimSeries>,
}

/// Simulated backend serving every configured region
pub struct SimBackend {
    regions: HashMap<Region, RegionSettings>,
    seed: u64,
    calls: AtomicU64,
}

impl SimBackend {
    pub fn new(regions: &[RegionSettings], seed: u64) -> Self {
        Self {
            regions: regions
                .iter()
                .map(|r| (Region::new(r.name.clone()), r.clone()))
                .collect(),
            seed,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of remote calls started so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn call_rng(&self, region: &Region) -> StdRng {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let region_fp = compute_fingerprint(region.as_str(), &[]);
        StdRng::seed_from_u64(self.seed ^ region_fp ^ call.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }
}

fn display_label(query: &MetricQuery) -> String {
    if let Some(label) = query.label.as_deref().filter(|l| !l.is_empty()) {
        return label.to_string();
    }
    match query.expression.as_deref().filter(|e| !e.is_empty()) {
        Some(expression) => expression.to_string(),
        None => format!("{} {}", query.metric_name, query.statistic),
    }
}

/// Generate one series. Values walk within [0, 100]; sample counts are
/// whole numbers.
fn generate_series(query: &SimQuery, time_range: &TimeRange) -> SimSeries {
    let mut rng = StdRng::seed_from_u64(query.series_seed);
    let mut timestamps = Vec::new();
    let mut values = Vec::new();

    let mut level: f64 = rng.gen_range(10.0..90.0);
    let mut ts = time_range.start - time_range.start.rem_euclid(query.period_ms);
    if ts < time_range.start {
        ts += query.period_ms;
    }

    while ts < time_range.end {
        level = (level + rng.gen_range(-5.0..5.0)).clamp(0.0, 100.0);
        let value = match query.statistic {
            Statistic::SampleCount => level.round(),
            Statistic::Sum => level * (query.period_ms / 1000) as f64,
            Statistic::Minimum => level * 0.8,
            Statistic::Maximum => (level * 1.2).min(100.0),
            Statistic::Average => level,
        };
        timestamps.push(ts);
        values.push(value);
        ts += query.period_ms;
    }

    SimSeries {
        id: query.id.clone(),
        timestamps,
        values,
    }
}

#[async_trait]
impl MetricsBackend for SimBackend {
    type Client = SimClient;
    type NativeQuery = SimQuery;
    type Request = SimRequest;
    type Response = SimResponse;
    type ResultSet = SimSeries;

    fn resolve_client(&self, region: &Region, ctx: &ExecutionContext) -> Result<SimClient, BoxError> {
        let settings = self
            .regions
            .get(region)
            .ok_or_else(|| format!("region {} is not served by datasource {}", region, ctx.datasource_uid))?;

        if let FailureMode::ClientError { message } = &settings.failure {
            return Err(message.clone().into());
        }

        Ok(SimClient {
            region: region.clone(),
            settings: settings.clone(),
        })
    }

    fn translate(&self, queries: &[MetricQuery]) -> Result<Vec<SimQuery>, BoxError> {
        queries
            .iter()
            .map(|q| -> Result<SimQuery, BoxError> {
                let mut tags: Vec<Tag> = q
                    .dimensions
                    .iter()
                    .filter_map(|(key, values)| values.first().map(|v| Tag::new(key.clone(), v.clone())))
                    .collect();
                tags.push(Tag::new("region", q.region.as_str()));
                tags.sort();
                for tag in &tags {
                    tag.validate()?;
                }

                let label = display_label(q);
                let identity = format!("{}/{}/{}", q.namespace, q.metric_name, label);
                Ok(SimQuery {
                    id: q.id.clone(),
                    series_seed: self.seed ^ compute_fingerprint(&identity, &tags),
                    label,
                    statistic: q.statistic,
                    period_ms: i64::from(q.period_secs) * 1000,
                    tags,
                })
            })
            .collect()
    }

    fn build_request(&self, time_range: &TimeRange, queries: &[SimQuery]) -> Result<SimRequest, BoxError> {
        if queries.len() > MAX_QUERIES_PER_REQUEST {
            return Err(format!(
                "{} queries exceed the limit of {} per request",
                queries.len(),
                MAX_QUERIES_PER_REQUEST
            )
            .into());
        }

        let datapoints = queries
            .iter()
            .map(|q| time_range.duration_millis() / q.period_ms.max(1))
            .fold(0i64, i64::saturating_add);
        if datapoints > MAX_DATAPOINTS_PER_REQUEST as i64 {
            return Err(format!(
                "request would return {} datapoints, limit is {}",
                datapoints, MAX_DATAPOINTS_PER_REQUEST
            )
            .into());
        }

        Ok(SimRequest {
            time_range: *time_range,
            queries: queries.to_vec(),
        })
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        client: &SimClient,
        request: SimRequest,
    ) -> Result<SimResponse, CallError> {
        let (latency, request_id) = {
            let mut rng = self.call_rng(&client.region);
            let jitter = if client.settings.jitter_ms > 0 {
                rng.gen_range(0..=client.settings.jitter_ms)
            } else {
                0
            };
            let request_id = format!("{:08x}-{:04x}", rng.gen::<u32>(), rng.gen::<u16>());
            (Duration::from_millis(client.settings.latency_ms + jitter), request_id)
        };

        trace!(region = %client.region, latency_ms = latency.as_millis() as u64, %request_id, "Simulated call started");
        tokio::select! {
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            _ = tokio::time::sleep(latency) => {}
        }

        match &client.settings.failure {
            FailureMode::RequestFailure { status_code, message } => {
                return Err(CallError::RequestFailure {
                    status_code: *status_code,
                    request_id,
                    message: message.clone(),
                })
            }
            FailureMode::Transport { message } => return Err(CallError::Transport(message.clone())),
            FailureMode::Panic { message } => panic!("{}", message),
            FailureMode::Healthy | FailureMode::ClientError { .. } => {}
        }

        let series = request
            .queries
            .iter()
            .map(|q| generate_series(q, &request.time_range))
            .collect::<Vec<_>>();

        debug!(region = %client.region, %request_id, series = series.len(), "Simulated call answered");
        Ok(SimResponse { request_id, series })
    }

    fn parse(&self, response: SimResponse, queries: &[SimQuery]) -> Result<Vec<SimSeries>, BoxError> {
        for query in queries {
            if !response.series.iter().any(|s| s.id == query.id) {
                return Err(format!(
                    "response {} has no result for query {}",
                    response.request_id, query.id
                )
                .into());
            }
        }
        Ok(response.series)
    }

    fn shape(
        &self,
        results: Vec<SimSeries>,
        queries: &[MetricQuery],
        _time_range: &TimeRange,
    ) -> Result<HashMap<QueryId, DataResponse>, BoxError> {
        let mut by_id: HashMap<QueryId, SimSeries> = results.into_iter().map(|s| (s.id.clone(), s)).collect();
        let native = self.translate(queries)?;

        let mut shaped = HashMap::with_capacity(queries.len());
        for query in native {
            let response = match by_id.remove(&query.id) {
                Some(series) if !series.timestamps.is_empty() => {
                    let mut frame = Frame::new(query.label.clone());
                    for tag in &query.tags {
                        frame = frame.with_label(tag.key.clone(), tag.value.clone());
                    }
                    frame.timestamps = series.timestamps;
                    frame.values = series.values;
                    frame.validate()?;
                    DataResponse::with_frames(vec![frame])
                }
                Some(_) => DataResponse::error("no datapoints in the requested range"),
                None => DataResponse::error("no result returned for query"),
            };
            shaped.insert(query.id, response);
        }

        Ok(shaped)
    }
}
