//! Aggregation rule definitions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tally_core::DataValue;

/// Aggregation operation
///
/// Unknown names are kept in [`Operation::Unsupported`] so a rule set with a
/// typo still loads; the rule then fails on its own when evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    /// Number of non-null values
    Count,
    /// Sum of numeric values
    Sum,
    /// Arithmetic mean
    Average,
    /// Smallest numeric value
    Min,
    /// Largest numeric value
    Max,
    /// 50th percentile
    Median,
    /// Nth percentile (parameter `percentile`, default 90)
    Percentile,
    /// Partition items by a field
    GroupBy,
    /// Cross-tabulate items by two fields
    Pivot,
    /// Evaluate a caller-supplied expression
    Custom,
    /// Anything else
    Unsupported(String),
}

impl Operation {
    /// Parse an operation name. Never fails: unknown names become
    /// [`Operation::Unsupported`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "average" | "avg" | "mean" => Self::Average,
            "min" => Self::Min,
            "max" => Self::Max,
            "median" => Self::Median,
            "percentile" => Self::Percentile,
            "group_by" | "groupby" => Self::GroupBy,
            "pivot" => Self::Pivot,
            "custom" => Self::Custom,
            _ => Self::Unsupported(name.to_string()),
        }
    }

    /// Canonical name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::Percentile => "percentile",
            Self::GroupBy => "group_by",
            Self::Pivot => "pivot",
            Self::Custom => "custom",
            Self::Unsupported(name) => name,
        }
    }

    /// Whether the evaluator knows this operation
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Operation {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<&str> for Operation {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

fn default_enabled() -> bool {
    true
}

/// A single aggregation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRule {
    /// Field (dotted path) the rule reads
    #[serde(default)]
    pub field: String,
    /// Operation to apply
    pub operation: Operation,
    /// Operation parameters
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, DataValue>,
    /// Optional condition expression; the rule is skipped when it is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Disabled rules are skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Execution order within a rule set (ties keep list order)
    #[serde(default)]
    pub order: i64,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

impl AggregationRule {
    /// Parameter naming the output key
    pub const OUTPUT_PARAM: &'static str = "as";

    /// Create an enabled rule with no parameters
    #[must_use]
    pub fn new(field: impl Into<String>, operation: impl Into<Operation>) -> Self {
        Self {
            field: field.into(),
            operation: operation.into(),
            parameters: IndexMap::new(),
            condition: None,
            enabled: true,
            order: 0,
            description: String::new(),
        }
    }

    /// Set execution order
    #[must_use]
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Add a parameter
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Set a condition expression
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the rule disabled
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Raw parameter
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&DataValue> {
        self.parameters.get(name)
    }

    /// Numeric parameter; `None` when absent or not a number
    #[must_use]
    pub fn number_parameter(&self, name: &str) -> Option<f64> {
        self.parameter(name)
            .and_then(DataValue::as_f64)
            .filter(|n| n.is_finite())
    }

    /// Text parameter; `None` when absent, not text, or blank
    #[must_use]
    pub fn text_parameter(&self, name: &str) -> Option<&str> {
        self.parameter(name)
            .and_then(DataValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether the rule reads every item rather than one field
    #[must_use]
    pub fn targets_whole_item(&self) -> bool {
        let field = self.field.trim();
        field.is_empty() || field == "*"
    }

    /// Key the rule's output is written under.
    ///
    /// The `as` parameter wins. Custom rules write to their field; other
    /// operations write to `<field>_<operation>`. Dots become underscores so
    /// the key stays reachable as a single path segment.
    #[must_use]
    pub fn output_key(&self) -> String {
        let key = if let Some(name) = self.text_parameter(Self::OUTPUT_PARAM) {
            name.to_string()
        } else {
            let field = self.field.trim();
            match (&self.operation, self.targets_whole_item()) {
                (Operation::Custom, true) => "custom".to_string(),
                (Operation::Custom, false) => field.to_string(),
                (op, true) => op.as_str().to_string(),
                (op, false) => format!("{}_{}", field, op.as_str()),
            }
        };
        key.replace('.', "_")
    }
}

/// Stable sort by `order`; rules with equal order keep their list position
#[must_use]
pub fn sorted_by_order(rules: &[AggregationRule]) -> Vec<AggregationRule> {
    let mut sorted = rules.to_vec();
    sorted.sort_by_key(|rule| rule.order);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("count"), Operation::Count);
        assert_eq!(Operation::parse("AVG"), Operation::Average);
        assert_eq!(Operation::parse(" groupby "), Operation::GroupBy);
        assert_eq!(
            Operation::parse("stddev"),
            Operation::Unsupported("stddev".to_string())
        );
    }

    #[test]
    fn test_operation_unsupported_keeps_name() {
        let op = Operation::parse("Geo_Mean");
        assert!(!op.is_supported());
        assert_eq!(op.as_str(), "Geo_Mean");
    }

    #[test]
    fn test_rule_deserialize_defaults() {
        let rule: AggregationRule =
            serde_json::from_value(json!({"field": "score", "operation": "average"})).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.order, 0);
        assert!(rule.parameters.is_empty());
        assert!(rule.condition.is_none());
        assert_eq!(rule.operation, Operation::Average);
    }

    #[test]
    fn test_rule_deserialize_unknown_operation() {
        let rule: AggregationRule =
            serde_json::from_value(json!({"field": "x", "operation": "mode"})).unwrap();
        assert_eq!(rule.operation, Operation::Unsupported("mode".to_string()));

        let back = serde_json::to_value(&rule).unwrap();
        assert_eq!(back["operation"], json!("mode"));
    }

    #[test]
    fn test_number_parameter_wrong_type() {
        let rule = AggregationRule::new("latency", Operation::Percentile)
            .with_parameter("percentile", "ninety");
        assert_eq!(rule.number_parameter("percentile"), None);

        let rule = AggregationRule::new("latency", Operation::Percentile)
            .with_parameter("percentile", 99.0);
        assert_eq!(rule.number_parameter("percentile"), Some(99.0));
    }

    #[test]
    fn test_output_key() {
        assert_eq!(AggregationRule::new("score", Operation::Average).output_key(), "score_average");
        assert_eq!(AggregationRule::new("*", Operation::Count).output_key(), "count");
        assert_eq!(
            AggregationRule::new("score", Operation::Sum)
                .with_parameter("as", "total")
                .output_key(),
            "total"
        );
        assert_eq!(AggregationRule::new("margin", Operation::Custom).output_key(), "margin");
    }

    #[test]
    fn test_output_key_flattens_dotted_fields() {
        assert_eq!(
            AggregationRule::new("metrics.latency", Operation::Average).output_key(),
            "metrics_latency_average"
        );
        assert_eq!(
            AggregationRule::new("totals.net", Operation::Custom).output_key(),
            "totals_net"
        );
        assert_eq!(
            AggregationRule::new("score", Operation::Max)
                .with_parameter("as", "stats.top")
                .output_key(),
            "stats_top"
        );
    }

    #[test]
    fn test_sorted_by_order_is_stable() {
        let rules = vec![
            AggregationRule::new("a", Operation::Sum).with_order(2),
            AggregationRule::new("b", Operation::Sum).with_order(1),
            AggregationRule::new("c", Operation::Sum).with_order(2),
            AggregationRule::new("d", Operation::Sum).with_order(1),
        ];
        let fields: Vec<_> = sorted_by_order(&rules)
            .into_iter()
            .map(|r| r.field)
            .collect();
        assert_eq!(fields, vec!["b", "d", "a", "c"]);
    }
}
