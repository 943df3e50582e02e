//! Unique identifiers for TALLY entities.
//!
//! IDs are time-ordered UUIDs (v7), so ids minted later sort later.
//! The canonical text form carries a kind prefix, e.g. `job_<uuid>`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Failure to parse an identifier from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind} id: {input}")]
pub struct IdError {
    /// Expected kind of id
    pub kind: &'static str,
    /// Rejected input
    pub input: String,
}

fn parse_prefixed(input: &str, prefix: &str, kind: &'static str) -> Result<Uuid, IdError> {
    let raw = input.strip_prefix(prefix).unwrap_or(input);
    Uuid::parse_str(raw).map_err(|_| IdError {
        kind,
        input: input.to_string(),
    })
}

/// Aggregation identifier - identifies a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AggregationId(Uuid);

impl AggregationId {
    const PREFIX: &'static str = "agg_";

    /// Create a new time-ordered AggregationId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for AggregationId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed(s, Self::PREFIX, "aggregation").map(Self)
    }
}

impl From<AggregationId> for String {
    fn from(id: AggregationId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for AggregationId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Job identifier - identifies an asynchronous aggregation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct JobId(Uuid);

impl JobId {
    const PREFIX: &'static str = "job_";

    /// Create a new time-ordered JobId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for JobId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed(s, Self::PREFIX, "job").map(Self)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for JobId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
