//! Built-in rule sets registered at startup.

use crate::schema::{AggregationType, RuleSet};
use tally_rules::{AggregationRule, Operation};

/// Id of the default business metrics rule set
pub const BUSINESS_METRICS_DEFAULT: &str = "business_metrics_default";

/// Id of the default risk assessment rule set
pub const RISK_ASSESSMENT_DEFAULT: &str = "risk_assessment_default";

/// Sum then average of `revenue`
fn business_metrics() -> RuleSet {
    RuleSet::new(
        BUSINESS_METRICS_DEFAULT,
        "Business metrics",
        AggregationType::BusinessMetrics,
    )
    .with_description("Total and average revenue")
    .with_rule(
        AggregationRule::new("revenue", Operation::Sum)
            .with_order(1)
            .with_description("Total revenue"),
    )
    .with_rule(
        AggregationRule::new("revenue", Operation::Average)
            .with_order(2)
            .with_description("Average revenue"),
    )
}

/// 95th percentile then max of `risk_score`
fn risk_assessment() -> RuleSet {
    RuleSet::new(
        RISK_ASSESSMENT_DEFAULT,
        "Risk assessment",
        AggregationType::RiskAssessment,
    )
    .with_description("Tail and peak risk scores")
    .with_rule(
        AggregationRule::new("risk_score", Operation::Percentile)
            .with_parameter("percentile", 95.0)
            .with_order(1)
            .with_description("95th percentile risk score"),
    )
    .with_rule(
        AggregationRule::new("risk_score", Operation::Max)
            .with_order(2)
            .with_description("Peak risk score"),
    )
}

/// All built-in rule sets
#[must_use]
pub fn default_rule_sets() -> Vec<RuleSet> {
    vec![business_metrics(), risk_assessment()]
}
