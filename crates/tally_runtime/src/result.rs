//! Aggregation results.

use serde::{Deserialize, Serialize};
use tally_core::{AggregationId, DataValue, Timestamp};
use tally_rules::AggregationRule;
use tally_schema::AggregationType;

/// Overall outcome of an aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStatus {
    /// No rule failed
    Success,
    /// Some rules failed, some applied
    Partial,
    /// Rules failed and none applied
    Failed,
}

impl AggregationStatus {
    /// Status for the given rule counts
    #[must_use]
    pub const fn from_counts(applied: usize, failed: usize) -> Self {
        match (applied, failed) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AggregationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule that failed, with its error message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFailure {
    /// The rule
    pub rule: AggregationRule,
    /// Error message
    pub error: String,
}

/// Rule counts for one aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSummary {
    /// Rules considered
    pub total_rules: usize,
    /// Rules applied
    pub applied_count: usize,
    /// Rules skipped (disabled or condition false)
    pub skipped_count: usize,
    /// Rules failed
    pub failed_count: usize,
    /// `applied_count / total_rules`, 0 when there are no rules
    pub success_rate: f64,
    /// Elements in the original payload
    pub data_count: usize,
}

impl AggregationSummary {
    /// Build a summary from counts
    #[must_use]
    pub fn new(applied: usize, skipped: usize, failed: usize, data_count: usize) -> Self {
        let total = applied + skipped + failed;
        let success_rate = if total == 0 {
            0.0
        } else {
            applied as f64 / total as f64
        };
        Self {
            total_rules: total,
            applied_count: applied,
            skipped_count: skipped,
            failed_count: failed,
            success_rate,
            data_count,
        }
    }
}

/// Outcome of running a request through its rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// Result id
    pub aggregation_id: AggregationId,
    /// Aggregation type of the request
    pub aggregation_type: AggregationType,
    /// Caller's business id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    /// Schema whose rules were applied, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    /// Overall status
    pub status: AggregationStatus,
    /// `status == success`
    pub is_successful: bool,
    /// Payload as received
    pub original_data: DataValue,
    /// Payload after every applied rule
    pub aggregated_data: DataValue,
    /// Rules applied, in execution order
    pub applied_rules: Vec<AggregationRule>,
    /// Rules skipped, in execution order
    pub skipped_rules: Vec<AggregationRule>,
    /// Rules failed, in execution order
    pub failed_rules: Vec<RuleFailure>,
    /// Counts
    pub summary: AggregationSummary,
    /// Completion time
    pub aggregated_at: Timestamp,
    /// Wall time spent applying rules
    pub processing_time_ms: u64,
}
