//! Core data types for fanq

use crate::error::{CoreError, Result};
use fxhash::FxHasher;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Millisecond-precision Unix epoch timestamp
pub type Timestamp = i64;

/// Region name that is resolved to the datasource's configured default region
pub const DEFAULT_REGION_PLACEHOLDER: &str = "default";

/// Identifier of a query within a batch (the "ref id").
///
/// Unique per request and stable for the lifetime of the request. The empty
/// identifier is reserved for fault results that cannot be attributed to a
/// single query.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    /// Create a new query identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The empty identifier used to tag whole-task faults
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryId {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

impl From<String> for QueryId {
    fn from(v: String) -> Self {
        Self(v)
    }
}

/// Remote metrics-API region (e.g. `us-east-1`)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    /// Create a new region
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty region and the `default` placeholder, both of which
    /// must be resolved against the datasource's default region.
    pub fn is_placeholder(&self) -> bool {
        self.0.is_empty() || self.0 == DEFAULT_REGION_PLACEHOLDER
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Region {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

impl From<String> for Region {
    fn from(v: String) -> Self {
        Self(v)
    }
}

/// A label is a key-value pair identifying a returned series
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    /// Create a new tag
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Validate the tag
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(CoreError::EmptyTagKey);
        }
        Ok(())
    }
}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tag {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.value.cmp(&other.value),
            other => other,
        }
    }
}

/// Time range shared by every query in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (exclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// A range is usable only when start strictly precedes end
    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(CoreError::InvalidTimeRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Get the duration of this range in milliseconds, saturating at
    /// `i64::MAX` for ranges wider than that
    pub fn duration_millis(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

/// One returned series: a named, labelled column of timestamped values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Display name of the series
    pub name: String,
    /// Labels identifying the series (sorted by key)
    pub labels: Vec<Tag>,
    /// Sample timestamps
    pub timestamps: Vec<Timestamp>,
    /// Sample values, aligned with `timestamps`
    pub values: Vec<f64>,
}

impl Frame {
    /// Create an empty frame
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Add a label, keeping labels sorted
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(Tag::new(key, value));
        self.labels.sort();
        self
    }

    /// Append one sample
    pub fn push(&mut self, ts: Timestamp, value: f64) {
        self.timestamps.push(ts);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Validate label keys and sample alignment
    pub fn validate(&self) -> Result<()> {
        for label in &self.labels {
            label.validate()?;
        }
        if self.timestamps.len() != self.values.len() {
            return Err(CoreError::MisalignedFrame {
                timestamps: self.timestamps.len(),
                values: self.values.len(),
            });
        }
        Ok(())
    }

    /// Stable fingerprint of name + labels
    pub fn fingerprint(&self) -> u64 {
        compute_fingerprint(&self.name, &self.labels)
    }
}

/// Compute a series fingerprint from a name and sorted labels.
/// Uses FxHash for fast hashing
pub fn compute_fingerprint(name: &str, labels: &[Tag]) -> u64 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    for tag in labels {
        tag.key.hash(&mut hasher);
        tag.value.hash(&mut hasher);
    }
    hasher.finish()
}

/// Result of a single query: either frames or an embedded error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    /// Returned series
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<Frame>,
    /// Per-query error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
    /// A successful response carrying frames
    pub fn with_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            error: None,
        }
    }

    /// A response carrying only an error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Total number of samples across all frames
    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }
}
