//! Rule set schema types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tally_core::{Timestamp, Version};
use tally_rules::{AggregationRule, sorted_by_order};

/// Kind of aggregation a request or rule set is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    /// Revenue, volume and similar business KPIs
    BusinessMetrics,
    /// Risk scoring
    RiskAssessment,
    /// Financial statements
    Financial,
    /// Latency and throughput
    Performance,
    /// Compliance checks
    Compliance,
    /// Caller-defined
    Custom,
}

impl AggregationType {
    /// Every aggregation type, in declaration order
    pub const ALL: [Self; 6] = [
        Self::BusinessMetrics,
        Self::RiskAssessment,
        Self::Financial,
        Self::Performance,
        Self::Compliance,
        Self::Custom,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BusinessMetrics => "business_metrics",
            Self::RiskAssessment => "risk_assessment",
            Self::Financial => "financial",
            Self::Performance => "performance",
            Self::Compliance => "compliance",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized aggregation type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown aggregation type: {0}")]
pub struct UnknownTypeError(pub String);

impl FromStr for AggregationType {
    type Err = UnknownTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| UnknownTypeError(s.to_string()))
    }
}

/// A named, versioned list of rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Aggregation type the rules are written for
    pub schema_type: AggregationType,
    /// Schema version
    #[serde(default)]
    pub version: Version,
    /// Rules, in declaration order
    #[serde(default)]
    pub rules: Vec<AggregationRule>,
    /// When first registered
    pub created_at: Timestamp,
    /// When last replaced
    pub updated_at: Timestamp,
}

impl RuleSet {
    /// Create an empty rule set
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, schema_type: AggregationType) -> Self {
        let now = Timestamp::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            schema_type,
            version: Version::default(),
            rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set version
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Append a rule
    #[must_use]
    pub fn with_rule(mut self, rule: AggregationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rules in execution order
    #[must_use]
    pub fn ordered_rules(&self) -> Vec<AggregationRule> {
        sorted_by_order(&self.rules)
    }

    /// Number of enabled rules
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }
}
