//! Region partitioning
//!
//! Groups a flat batch of queries by the region they target. This is the
//! only validation the engine does itself: batch shape, the shared time
//! range, and query identifiers. Everything query-specific beyond that is
//! the backend's concern.

use crate::error::{QueryError, Result};
use crate::model::MetricQuery;
use fanq_core::{Region, TimeRange};
use std::collections::{BTreeMap, HashSet};

/// Queries grouped by target region, in submission order within a region
pub type RegionGroups = BTreeMap<Region, Vec<MetricQuery>>;

/// A validated batch, ready to be fanned out
#[derive(Debug, Clone)]
pub struct PartitionedBatch {
    /// Time range shared by every query
    pub time_range: TimeRange,
    /// One group per distinct region
    pub groups: RegionGroups,
}

impl PartitionedBatch {
    /// A batch with no groups. Executing it spawns nothing.
    pub fn empty(time_range: TimeRange) -> Self {
        Self {
            time_range,
            groups: RegionGroups::new(),
        }
    }

    /// Number of distinct regions (and therefore tasks)
    pub fn region_count(&self) -> usize {
        self.groups.len()
    }

    /// Total number of queries across all regions
    pub fn query_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Regions in the batch, in sorted order
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.groups.keys()
    }
}

/// Partition a batch by region.
///
/// Fails if the batch is empty, if the shared time range is not strictly
/// increasing, if a query disagrees with the shared range, or if a query id
/// is empty or repeated. Queries targeting the `default` placeholder are
/// routed to `default_region` and carry that region from then on.
pub fn partition(queries: Vec<MetricQuery>, default_region: Option<&Region>) -> Result<PartitionedBatch> {
    let first = queries
        .first()
        .ok_or_else(|| QueryError::InvalidQuery("request contains no queries".to_string()))?;

    // The range is shared by the whole batch, so it is checked once
    let time_range = first.time_range;
    time_range.validate()?;

    let mut seen = HashSet::with_capacity(queries.len());
    let mut groups = RegionGroups::new();

    for mut query in queries {
        query.validate()?;

        if query.time_range != time_range {
            return Err(QueryError::InvalidQuery(format!(
                "query {} has time range {}..{} but the batch uses {}..{}",
                query.id, query.time_range.start, query.time_range.end, time_range.start, time_range.end
            )));
        }

        if !seen.insert(query.id.clone()) {
            return Err(QueryError::InvalidQuery(format!(
                "duplicate query id: {}",
                query.id
            )));
        }

        let region = resolve_region(&query, default_region)?;
        query.region = region.clone();
        groups.entry(region).or_insert_with(Vec::new).push(query);
    }

    Ok(PartitionedBatch { time_range, groups })
}

fn resolve_region(query: &MetricQuery, default_region: Option<&Region>) -> Result<Region> {
    if !query.region.is_placeholder() {
        return Ok(query.region.clone());
    }

    match default_region {
        Some(region) if !region.is_placeholder() => Ok(region.clone()),
        _ => Err(QueryError::InvalidQuery(format!(
            "query {} targets the default region but none is configured",
            query.id
        ))),
    }
}
