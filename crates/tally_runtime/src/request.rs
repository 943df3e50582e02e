//! Aggregation requests.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tally_core::{AggregationError, DataValue, TallyResult, Timestamp};
use tally_rules::AggregationRule;
use tally_schema::AggregationType;

/// Inclusive time window the data covers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Window start
    pub start: Timestamp,
    /// Window end
    pub end: Timestamp,
}

/// A request to aggregate a payload
///
/// `aggregation_type` and `data` are optional on the wire so that a request
/// missing them decodes and then fails [`validate`](Self::validate) with a
/// field-specific message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregationRequest {
    /// Caller's business identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    /// Aggregation type name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_type: Option<String>,
    /// Payload to aggregate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataValue>,
    /// Inline rules, used when no schema is given or found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<AggregationRule>>,
    /// Registered rule set to apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    /// Grouping hints, carried through unchanged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// Filters, carried through unchanged
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub filters: IndexMap<String, DataValue>,
    /// Time window, carried through unchanged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// Caller metadata, carried through unchanged
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, DataValue>,
}

impl AggregationRequest {
    /// Create a request with a type and payload
    #[must_use]
    pub fn new(aggregation_type: AggregationType, data: impl Into<DataValue>) -> Self {
        Self {
            aggregation_type: Some(aggregation_type.as_str().to_string()),
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// Set business id
    #[must_use]
    pub fn with_business_id(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    /// Set inline rules
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<AggregationRule>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Set schema id
    #[must_use]
    pub fn with_schema(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    /// Check required fields and return the parsed aggregation type
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first offending field
    pub fn validate(&self) -> TallyResult<AggregationType> {
        let name = self
            .aggregation_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AggregationError::validation("aggregation_type", "is required"))?;
        let aggregation_type = name
            .parse::<AggregationType>()
            .map_err(|e| AggregationError::validation("aggregation_type", e.to_string()))?;

        if self.data.is_none() {
            return Err(AggregationError::validation("data", "is required"));
        }

        if let Some(range) = &self.time_range {
            if range.start > range.end {
                return Err(AggregationError::validation("time_range", "start is after end"));
            }
        }

        Ok(aggregation_type)
    }
}
