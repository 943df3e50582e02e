//! Time types for TALLY.
//!
//! Wall clock timestamps for record metadata (`created_at`, `aggregated_at`).
//! Elapsed processing time is measured separately with `std::time::Instant`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wall clock timestamp in UTC, serialized as RFC 3339
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Get current timestamp
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create from milliseconds since the Unix epoch
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Milliseconds since the Unix epoch
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Duration since an earlier timestamp (zero if `earlier` is later)
    #[must_use]
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether more than `ttl` has elapsed between `self` and `now`
    #[must_use]
    pub fn is_older_than(&self, ttl: Duration, now: &Timestamp) -> bool {
        now.duration_since(self) > ttl
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}
