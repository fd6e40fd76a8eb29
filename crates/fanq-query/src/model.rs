//! Query model - Data structures for metric queries and batch results

use crate::error::{QueryError, Result};
use fanq_core::{DataResponse, QueryId, Region, TimeRange, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Statistic requested from the remote metrics API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Statistic {
    #[default]
    Average,
    Sum,
    Minimum,
    Maximum,
    SampleCount,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Statistic::Average => "Average",
            Statistic::Sum => "Sum",
            Statistic::Minimum => "Minimum",
            Statistic::Maximum => "Maximum",
            Statistic::SampleCount => "SampleCount",
        };
        f.write_str(name)
    }
}

/// A single time-series metric query in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Identifier the result is returned under
    pub id: QueryId,
    /// Target region (`default` or empty resolves to the datasource default)
    pub region: Region,
    /// Time range, shared by every query in the batch
    pub time_range: TimeRange,
    /// Metric namespace (e.g. `AWS/EC2`)
    pub namespace: String,
    /// Metric name (e.g. `CPUUtilization`)
    pub metric_name: String,
    /// Dimension filters; multiple values are OR-ed
    pub dimensions: BTreeMap<String, Vec<String>>,
    /// Statistic to compute per period
    pub statistic: Statistic,
    /// Aggregation period in seconds
    pub period_secs: u32,
    /// Free-form math/search expression, used instead of namespace/metric
    pub expression: Option<String>,
    /// Display label for returned series
    pub label: Option<String>,
}

impl MetricQuery {
    /// Create a new query builder
    pub fn builder(id: impl Into<QueryId>) -> MetricQueryBuilder {
        MetricQueryBuilder::new(id)
    }

    /// True when this query is an expression rather than a metric lookup
    pub fn is_expression(&self) -> bool {
        self.expression.as_deref().map_or(false, |e| !e.is_empty())
    }

    /// Validate the query-specific parameters.
    ///
    /// The time range is batch-level and is checked once by the partitioner.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(QueryError::InvalidQuery("Empty query id".to_string()));
        }

        if !self.is_expression() && (self.namespace.is_empty() || self.metric_name.is_empty()) {
            return Err(QueryError::InvalidQuery(format!(
                "query {} needs a namespace and metric name or an expression",
                self.id
            )));
        }

        if self.period_secs == 0 {
            return Err(QueryError::InvalidQuery(format!(
                "query {} has a zero period",
                self.id
            )));
        }

        Ok(())
    }
}

/// Query builder for fluent API
pub struct MetricQueryBuilder {
    id: QueryId,
    region: Region,
    time_range: TimeRange,
    namespace: String,
    metric_name: String,
    dimensions: BTreeMap<String, Vec<String>>,
    statistic: Statistic,
    period_secs: u32,
    expression: Option<String>,
    label: Option<String>,
}

impl MetricQueryBuilder {
    /// Create a new query builder
    pub fn new(id: impl Into<QueryId>) -> Self {
        Self {
            id: id.into(),
            region: Region::new(fanq_core::DEFAULT_REGION_PLACEHOLDER),
            time_range: TimeRange::new(0, 0),
            namespace: String::new(),
            metric_name: String::new(),
            dimensions: BTreeMap::new(),
            statistic: Statistic::default(),
            period_secs: 60,
            expression: None,
            label: None,
        }
    }

    /// Set target region
    pub fn region(mut self, region: impl Into<Region>) -> Self {
        self.region = region.into();
        self
    }

    /// Set time range
    pub fn time_range(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.time_range = TimeRange::new(start, end);
        self
    }

    /// Set namespace and metric name
    pub fn metric(mut self, namespace: impl Into<String>, metric_name: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.metric_name = metric_name.into();
        self
    }

    /// Add a dimension value
    pub fn dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Set statistic
    pub fn statistic(mut self, statistic: Statistic) -> Self {
        self.statistic = statistic;
        self
    }

    /// Set period in seconds
    pub fn period_secs(mut self, period: u32) -> Self {
        self.period_secs = period;
        self
    }

    /// Use an expression instead of a metric lookup
    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Set display label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Build the query
    pub fn build(self) -> Result<MetricQuery> {
        let query = MetricQuery {
            id: self.id,
            region: self.region,
            time_range: self.time_range,
            namespace: self.namespace,
            metric_name: self.metric_name,
            dimensions: self.dimensions,
            statistic: self.statistic,
            period_secs: self.period_secs,
            expression: self.expression,
            label: self.label,
        };

        query.validate()?;
        Ok(query)
    }
}

/// Execution context used to resolve client handles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Organization / tenant issuing the request
    pub org_id: i64,
    /// Datasource the batch targets
    pub datasource_uid: String,
    /// Region substituted for queries targeting `default`
    pub default_region: Option<Region>,
    /// Datasource settings (credentials profile, endpoint overrides, ...)
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl ExecutionContext {
    /// Create a new execution context
    pub fn new(org_id: i64, datasource_uid: impl Into<String>) -> Self {
        Self {
            org_id,
            datasource_uid: datasource_uid.into(),
            default_region: None,
            settings: HashMap::new(),
        }
    }

    /// Set the default region
    pub fn with_default_region(mut self, region: impl Into<Region>) -> Self {
        self.default_region = Some(region.into());
        self
    }

    /// Add a datasource setting
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Look up a datasource setting
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

/// A result emitted by a region task, tagged with its query id.
///
/// An empty id marks a fault result: a whole-task failure not attributable
/// to one query.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedResult {
    pub id: QueryId,
    pub response: DataResponse,
}

impl TaggedResult {
    /// Result for a specific query
    pub fn new(id: QueryId, response: DataResponse) -> Self {
        Self { id, response }
    }

    /// Fault result carrying only an error
    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            id: QueryId::empty(),
            response: DataResponse::error(message),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.id.is_empty()
    }
}

/// Final response of a batch: one entry per query id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDataResponse {
    pub responses: HashMap<QueryId, DataResponse>,
}

impl QueryDataResponse {
    /// Create an empty response
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the result for a query
    pub fn get(&self, id: &str) -> Option<&DataResponse> {
        self.responses.get(&QueryId::new(id))
    }

    /// Check if response is empty
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Number of entries carrying an embedded error
    pub fn error_count(&self) -> usize {
        self.responses.values().filter(|r| r.is_error()).count()
    }
}
