//! Rule evaluator.
//!
//! Applies one rule to the working data and returns the new working data.
//! Evaluation is pure: the input is never mutated and nothing is shared
//! between calls.

use crate::condition::{ConditionError, Expression};
use crate::rule::{AggregationRule, Operation};
use indexmap::IndexMap;
use tally_core::{DataValue, Record};
use tracing::debug;

/// Percentile used when the `percentile` parameter is absent or invalid
pub const DEFAULT_PERCENTILE: f64 = 90.0;

/// Rule evaluation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    /// Operation name the evaluator does not know
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// Missing or malformed parameter
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason
        reason: String,
    },
    /// Operation needs a concrete field
    #[error("Operation '{operation}' requires a field")]
    MissingField {
        /// Operation name
        operation: String,
    },
    /// Condition or custom expression failed
    #[error("Expression error: {0}")]
    Condition(#[from] ConditionError),
}

impl RuleError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Stateless rule evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Create a new evaluator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Whether the rule's condition holds for `data`. Rules without a
    /// condition always hold.
    ///
    /// # Errors
    ///
    /// Returns error if the condition does not parse or evaluate
    pub fn condition_holds(&self, data: &DataValue, rule: &AggregationRule) -> Result<bool, RuleError> {
        match rule.condition.as_deref().map(str::trim) {
            None | Some("") => Ok(true),
            Some(source) => Ok(Expression::parse(source)?.holds(data)?),
        }
    }

    /// Apply a rule, returning the new working data
    ///
    /// # Errors
    ///
    /// Returns error if the operation is unsupported or its parameters are
    /// invalid
    pub fn apply(&self, data: &DataValue, rule: &AggregationRule) -> Result<DataValue, RuleError> {
        debug!(operation = %rule.operation, field = %rule.field, "applying rule");

        let output = match &rule.operation {
            Operation::Count => count(data, rule),
            Operation::Sum => reduce(&Operation::Sum, &numeric_values(data, rule)),
            Operation::Average => reduce(&Operation::Average, &numeric_values(data, rule)),
            Operation::Min => reduce(&Operation::Min, &numeric_values(data, rule)),
            Operation::Max => reduce(&Operation::Max, &numeric_values(data, rule)),
            Operation::Median => reduce(&Operation::Median, &numeric_values(data, rule)),
            Operation::Percentile => percentile_op(data, rule),
            Operation::GroupBy => group_by(data, rule)?,
            Operation::Pivot => pivot(data, rule)?,
            Operation::Custom => custom(data, rule)?,
            Operation::Unsupported(name) => {
                return Err(RuleError::UnsupportedOperation(name.clone()));
            }
        };

        Ok(place(data, rule.output_key(), output))
    }
}

/// The items a payload is made of: a sequence's elements, a record's `items`
/// sequence, otherwise the payload itself (nothing for null).
fn items(data: &DataValue) -> Vec<&DataValue> {
    match data {
        DataValue::Sequence(seq) => seq.iter().collect(),
        DataValue::Record(record) => match record.get(DataValue::ITEMS_KEY) {
            Some(DataValue::Sequence(seq)) => seq.iter().collect(),
            _ => vec![data],
        },
        scalar if scalar.is_null() => Vec::new(),
        scalar => vec![scalar],
    }
}

/// Values of the rule's field across the payload
fn collect<'a>(data: &'a DataValue, rule: &AggregationRule) -> Vec<&'a DataValue> {
    if rule.targets_whole_item() {
        return items(data);
    }
    let field = rule.field.trim();

    match data {
        DataValue::Sequence(seq) => seq
            .iter()
            .filter_map(|item| match item {
                DataValue::Record(_) => item.lookup(field),
                other => Some(other),
            })
            .collect(),
        DataValue::Record(record) => match data.lookup(field) {
            Some(DataValue::Sequence(seq)) => seq.iter().collect(),
            Some(value) => vec![value],
            None => match record.get(DataValue::ITEMS_KEY) {
                Some(DataValue::Sequence(seq)) => {
                    seq.iter().filter_map(|item| item.lookup(field)).collect()
                }
                _ => Vec::new(),
            },
        },
        scalar => vec![scalar],
    }
}

fn numeric_values(data: &DataValue, rule: &AggregationRule) -> Vec<f64> {
    collect(data, rule)
        .into_iter()
        .filter_map(DataValue::as_f64)
        .filter(|n| n.is_finite())
        .collect()
}

fn count(data: &DataValue, rule: &AggregationRule) -> DataValue {
    let n = collect(data, rule).iter().filter(|v| !v.is_null()).count();
    DataValue::from(n)
}

/// Reduce numbers with a numeric operation; count is the number of values
fn reduce(op: &Operation, values: &[f64]) -> DataValue {
    if let Operation::Count = op {
        return DataValue::from(values.len());
    }
    if let Operation::Sum = op {
        return DataValue::number(values.iter().sum());
    }
    if values.is_empty() {
        return DataValue::null();
    }
    let value = match op {
        Operation::Average => values.iter().sum::<f64>() / values.len() as f64,
        Operation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Operation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Operation::Median => percentile(values, 50.0),
        _ => return DataValue::null(),
    };
    DataValue::number(value)
}

/// Linear interpolation between closest ranks. `values` must be non-empty.
fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = p * (sorted.len() - 1) as f64 / 100.0;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn percentile_op(data: &DataValue, rule: &AggregationRule) -> DataValue {
    let p = match rule.parameter("percentile") {
        None => DEFAULT_PERCENTILE,
        Some(raw) => match rule.number_parameter("percentile") {
            Some(p) if (0.0..=100.0).contains(&p) => p,
            _ => {
                debug!(parameter = %raw, "invalid percentile, using default");
                DEFAULT_PERCENTILE
            }
        },
    };

    let values = numeric_values(data, rule);
    if values.is_empty() {
        return DataValue::null();
    }
    DataValue::number(percentile(&values, p))
}

fn require_field<'a>(rule: &'a AggregationRule) -> Result<&'a str, RuleError> {
    if rule.targets_whole_item() {
        return Err(RuleError::MissingField {
            operation: rule.operation.to_string(),
        });
    }
    Ok(rule.field.trim())
}

fn label_at(item: &DataValue, path: &str) -> String {
    item.lookup(path).map_or_else(|| "null".to_string(), DataValue::label)
}

fn group_by(data: &DataValue, rule: &AggregationRule) -> Result<DataValue, RuleError> {
    let field = require_field(rule)?;

    let reducer = match rule.text_parameter("reduce") {
        None => None,
        Some(name) => match Operation::parse(name) {
            op @ (Operation::Count
            | Operation::Sum
            | Operation::Average
            | Operation::Min
            | Operation::Max
            | Operation::Median) => Some(op),
            _ => return Err(RuleError::invalid("reduce", format!("cannot reduce with '{name}'"))),
        },
    };
    let value_field = rule.text_parameter("value_field");
    if matches!(reducer, Some(ref op) if *op != Operation::Count) && value_field.is_none() {
        return Err(RuleError::invalid("value_field", "required when reduce is set"));
    }

    let mut groups: IndexMap<String, Vec<DataValue>> = IndexMap::new();
    for item in items(data) {
        groups
            .entry(label_at(item, field))
            .or_default()
            .push(item.clone());
    }

    let output: Record = groups
        .into_iter()
        .map(|(key, members)| {
            let value = match &reducer {
                None => {
                    let mut group = Record::new();
                    group.insert("count".to_string(), DataValue::from(members.len()));
                    group.insert(DataValue::ITEMS_KEY.to_string(), DataValue::Sequence(members));
                    DataValue::Record(group)
                }
                Some(Operation::Count) => DataValue::from(members.len()),
                Some(op) => {
                    let path = value_field.unwrap_or_default();
                    let values: Vec<f64> = members
                        .iter()
                        .filter_map(|m| m.lookup(path).and_then(DataValue::as_f64))
                        .filter(|n| n.is_finite())
                        .collect();
                    reduce(op, &values)
                }
            };
            (key, value)
        })
        .collect();

    Ok(DataValue::Record(output))
}

fn pivot(data: &DataValue, rule: &AggregationRule) -> Result<DataValue, RuleError> {
    let field = require_field(rule)?;
    let columns = rule
        .text_parameter("columns")
        .ok_or_else(|| RuleError::invalid("columns", "required"))?;
    let values = rule.text_parameter("values");

    let mut rows: IndexMap<String, IndexMap<String, f64>> = IndexMap::new();
    for item in items(data) {
        let cell = rows
            .entry(label_at(item, field))
            .or_default()
            .entry(label_at(item, columns))
            .or_insert(0.0);
        *cell += match values {
            Some(path) => item
                .lookup(path)
                .and_then(DataValue::as_f64)
                .filter(|n| n.is_finite())
                .unwrap_or(0.0),
            None => 1.0,
        };
    }

    let output: Record = rows
        .into_iter()
        .map(|(row, cells)| {
            let cells: Record = cells
                .into_iter()
                .map(|(col, v)| (col, DataValue::number(v)))
                .collect();
            (row, DataValue::Record(cells))
        })
        .collect();

    Ok(DataValue::Record(output))
}

fn custom(data: &DataValue, rule: &AggregationRule) -> Result<DataValue, RuleError> {
    let source = rule
        .text_parameter("expression")
        .ok_or_else(|| RuleError::invalid("expression", "required"))?;
    Ok(Expression::parse(source)?.evaluate(data)?)
}

/// Write `output` under `key`, wrapping non-record payloads so the original
/// content stays reachable
fn place(data: &DataValue, key: String, output: DataValue) -> DataValue {
    let mut record = match data {
        DataValue::Record(record) => record.clone(),
        DataValue::Sequence(_) => {
            let mut record = Record::new();
            record.insert(DataValue::ITEMS_KEY.to_string(), data.clone());
            record
        }
        DataValue::Scalar(_) => {
            let mut record = Record::new();
            record.insert(DataValue::VALUE_KEY.to_string(), data.clone());
            record
        }
    };
    record.insert(key, output);
    DataValue::Record(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn apply(data: serde_json::Value, rule: &AggregationRule) -> serde_json::Value {
        let out = RuleEvaluator::new().apply(&DataValue::from(data), rule).unwrap();
        serde_json::Value::from(out)
    }

    fn sales() -> serde_json::Value {
        json!({
            "items": [
                { "region": "emea", "product": "a", "revenue": 100 },
                { "region": "apac", "product": "a", "revenue": 50 },
                { "region": "emea", "product": "b", "revenue": 30 },
                { "region": "emea", "product": "a", "revenue": "n/a" }
            ]
        })
    }

    #[test]
    fn test_average_over_items() {
        let rule = AggregationRule::new("score", Operation::Average);
        let out = apply(json!({"items": [{"score": 10}, {"score": 20}]}), &rule);
        assert_eq!(out["score_average"], json!(15.0));
        assert_eq!(out["items"][0]["score"], json!(10.0));
    }

    #[test]
    fn test_sequence_input_is_wrapped() {
        let rule = AggregationRule::new("*", Operation::Sum);
        let out = apply(json!([1, 2, 3]), &rule);
        assert_eq!(out["sum"], json!(6.0));
        assert_eq!(out["items"], json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_scalar_input_is_wrapped() {
        let rule = AggregationRule::new("value", Operation::Max).with_parameter("as", "peak");
        let out = apply(json!(7), &rule);
        assert_eq!(out, json!({"value": 7.0, "peak": 7.0}));
    }

    #[test]
    fn test_numeric_ops_ignore_non_numbers() {
        let data = sales();
        assert_eq!(apply(data.clone(), &AggregationRule::new("revenue", Operation::Sum))["revenue_sum"], json!(180.0));
        assert_eq!(apply(data.clone(), &AggregationRule::new("revenue", Operation::Min))["revenue_min"], json!(30.0));
        assert_eq!(apply(data.clone(), &AggregationRule::new("revenue", Operation::Max))["revenue_max"], json!(100.0));
        assert_eq!(apply(data, &AggregationRule::new("revenue", Operation::Median))["revenue_median"], json!(50.0));
    }

    #[test]
    fn test_empty_values() {
        let data = json!({"items": []});
        assert_eq!(apply(data.clone(), &AggregationRule::new("x", Operation::Sum))["x_sum"], json!(0.0));
        assert_eq!(apply(data.clone(), &AggregationRule::new("x", Operation::Average))["x_average"], json!(null));
        assert_eq!(apply(data.clone(), &AggregationRule::new("x", Operation::Percentile))["x_percentile"], json!(null));
        assert_eq!(apply(data, &AggregationRule::new("x", Operation::Count))["x_count"], json!(0.0));
    }

    #[test]
    fn test_count_whole_items_and_field() {
        let data = json!([{"a": 1}, {"a": null}, {"b": 2}]);
        assert_eq!(apply(data.clone(), &AggregationRule::new("*", Operation::Count))["count"], json!(3.0));
        assert_eq!(apply(data, &AggregationRule::new("a", Operation::Count))["a_count"], json!(1.0));
    }

    #[test]
    fn test_record_field_nested_sequence() {
        let rule = AggregationRule::new("metrics.latency", Operation::Average);
        let out = apply(json!({"metrics": {"latency": [10, 20, 60]}}), &rule);
        assert_eq!(out["metrics_latency_average"], json!(30.0));
    }

    #[test]
    fn test_percentile_interpolates() {
        let data = json!([1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let rule = AggregationRule::new("*", Operation::Percentile);
        assert_eq!(apply(data.clone(), &rule)["percentile"], json!(9.1));

        let rule = AggregationRule::new("*", Operation::Percentile).with_parameter("percentile", 50.0);
        assert_eq!(apply(data, &rule)["percentile"], json!(5.5));
    }

    #[test]
    fn test_percentile_invalid_parameter_falls_back() {
        let data = json!([1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        for bad in [DataValue::number(150.0), DataValue::text("high"), DataValue::number(-1.0)] {
            let rule = AggregationRule::new("*", Operation::Percentile).with_parameter("percentile", bad);
            assert_eq!(apply(data.clone(), &rule)["percentile"], json!(9.1));
        }
    }

    #[test]
    fn test_group_by_without_reduce() {
        let rule = AggregationRule::new("region", Operation::GroupBy);
        let out = RuleEvaluator::new()
            .apply(&DataValue::from(sales()), &rule)
            .unwrap();
        let groups = out.lookup("region_group_by").and_then(DataValue::as_record).unwrap();
        let keys: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(keys, vec!["emea", "apac"]);
        assert_eq!(out.lookup("region_group_by.emea.count").and_then(DataValue::as_f64), Some(3.0));
        assert_eq!(out.lookup("region_group_by.apac.count").and_then(DataValue::as_f64), Some(1.0));
    }

    #[test]
    fn test_group_by_missing_field_is_null_group() {
        let rule = AggregationRule::new("tier", Operation::GroupBy);
        let out = apply(json!([{"tier": 1}, {"other": 2}]), &rule);
        assert_eq!(out["tier_group_by"]["1"]["count"], json!(1.0));
        assert_eq!(out["tier_group_by"]["null"]["count"], json!(1.0));
    }

    #[test]
    fn test_group_by_with_reduce() {
        let rule = AggregationRule::new("region", Operation::GroupBy)
            .with_parameter("reduce", "sum")
            .with_parameter("value_field", "revenue");
        let out = apply(sales(), &rule);
        assert_eq!(out["region_group_by"], json!({"emea": 130.0, "apac": 50.0}));
    }

    #[test]
    fn test_group_by_invalid_reduce() {
        let rule = AggregationRule::new("region", Operation::GroupBy).with_parameter("reduce", "pivot");
        let err = RuleEvaluator::new()
            .apply(&DataValue::from(sales()), &rule)
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidParameter { ref name, .. } if name == "reduce"));

        let rule = AggregationRule::new("region", Operation::GroupBy).with_parameter("reduce", "sum");
        let err = RuleEvaluator::new()
            .apply(&DataValue::from(sales()), &rule)
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidParameter { ref name, .. } if name == "value_field"));
    }

    #[test]
    fn test_group_by_requires_field() {
        let rule = AggregationRule::new("*", Operation::GroupBy);
        let err = RuleEvaluator::new()
            .apply(&DataValue::from(sales()), &rule)
            .unwrap_err();
        assert!(matches!(err, RuleError::MissingField { .. }));
    }

    #[test]
    fn test_pivot() {
        let rule = AggregationRule::new("region", Operation::Pivot)
            .with_parameter("columns", "product")
            .with_parameter("values", "revenue")
            .with_parameter("as", "table");
        let out = apply(sales(), &rule);
        assert_eq!(
            out["table"],
            json!({"emea": {"a": 100.0, "b": 30.0}, "apac": {"a": 50.0}})
        );

        let rule = AggregationRule::new("region", Operation::Pivot).with_parameter("columns", "product");
        let out = apply(sales(), &rule);
        assert_eq!(out["region_pivot"]["emea"]["a"], json!(2.0));
    }

    #[test]
    fn test_pivot_requires_columns() {
        let rule = AggregationRule::new("region", Operation::Pivot);
        let err = RuleEvaluator::new()
            .apply(&DataValue::from(sales()), &rule)
            .unwrap_err();
        assert_eq!(err, RuleError::invalid("columns", "required"));
    }

    #[test]
    fn test_custom_expression() {
        let rule = AggregationRule::new("margin", Operation::Custom)
            .with_parameter("expression", "revenue - cost");
        let out = apply(json!({"revenue": 500, "cost": 120}), &rule);
        assert_eq!(out["margin"], json!(380.0));
    }

    #[test]
    fn test_custom_errors() {
        let evaluator = RuleEvaluator::new();
        let data = DataValue::from(json!({"revenue": 1}));

        let rule = AggregationRule::new("x", Operation::Custom);
        assert!(matches!(
            evaluator.apply(&data, &rule),
            Err(RuleError::InvalidParameter { .. })
        ));

        let rule = AggregationRule::new("x", Operation::Custom).with_parameter("expression", "revenue +");
        assert!(matches!(evaluator.apply(&data, &rule), Err(RuleError::Condition(_))));
    }

    #[test]
    fn test_unsupported_operation() {
        let rule = AggregationRule::new("x", "stddev");
        let err = RuleEvaluator::new()
            .apply(&DataValue::from(json!({"x": 1})), &rule)
            .unwrap_err();
        assert_eq!(err, RuleError::UnsupportedOperation("stddev".to_string()));
    }

    #[test]
    fn test_rules_compose() {
        let evaluator = RuleEvaluator::new();
        let data = DataValue::from(json!({"items": [{"revenue": 10}, {"revenue": 30}]}));
        let data = evaluator
            .apply(&data, &AggregationRule::new("revenue", Operation::Sum))
            .unwrap();
        let data = evaluator
            .apply(&data, &AggregationRule::new("revenue", Operation::Average))
            .unwrap();
        assert_eq!(data.lookup("revenue_sum").and_then(DataValue::as_f64), Some(40.0));
        assert_eq!(data.lookup("revenue_average").and_then(DataValue::as_f64), Some(20.0));
    }

    #[test]
    fn test_condition_holds() {
        let evaluator = RuleEvaluator::new();
        let data = DataValue::from(json!({"region": "emea"}));

        let rule = AggregationRule::new("x", Operation::Count);
        assert!(evaluator.condition_holds(&data, &rule).unwrap());

        let rule = rule.with_condition("region == 'apac'");
        assert!(!evaluator.condition_holds(&data, &rule).unwrap());

        let rule = AggregationRule::new("x", Operation::Count).with_condition("region ==");
        assert!(evaluator.condition_holds(&data, &rule).is_err());
    }

    #[test]
    fn test_input_not_mutated() {
        let data = DataValue::from(sales());
        let before = data.clone();
        let _ = RuleEvaluator::new().apply(&data, &AggregationRule::new("revenue", Operation::Sum));
        assert_eq!(data, before);
    }

    proptest! {
        #[test]
        fn test_count_matches_sequence_length(values in proptest::collection::vec(-1e6f64..1e6, 0..50)) {
            let data = DataValue::Sequence(values.iter().copied().map(DataValue::number).collect());
            let out = RuleEvaluator::new().apply(&data, &AggregationRule::new("*", Operation::Count)).unwrap();
            prop_assert_eq!(out.lookup("count").and_then(DataValue::as_f64), Some(values.len() as f64));
        }

        #[test]
        fn test_min_median_max_ordering(values in proptest::collection::vec(-1e6f64..1e6, 1..50)) {
            let data = DataValue::Sequence(values.iter().copied().map(DataValue::number).collect());
            let evaluator = RuleEvaluator::new();
            let get = |op: Operation| {
                let key = format!("{op}");
                evaluator
                    .apply(&data, &AggregationRule::new("*", op))
                    .ok()
                    .and_then(|out| out.lookup(&key).and_then(DataValue::as_f64))
            };
            let min = get(Operation::Min).unwrap();
            let median = get(Operation::Median).unwrap();
            let max = get(Operation::Max).unwrap();
            prop_assert!(min <= median && median <= max);
        }
    }
}
