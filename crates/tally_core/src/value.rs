//! Aggregation payload values.
//!
//! A payload is a record, a sequence, or a scalar. On the wire it is plain
//! JSON; the untagged representation picks the variant from the JSON shape.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered string-keyed map of values
pub type Record = IndexMap<String, DataValue>;

/// Leaf value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// UTF-8 text
    Text(String),
}

/// Aggregation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Leaf value
    Scalar(Scalar),
    /// Ordered list of values
    Sequence(Vec<DataValue>),
    /// Keyed record
    Record(Record),
}

impl DataValue {
    /// Path segment that names a sequence payload itself
    pub const ITEMS_KEY: &'static str = "items";
    /// Path segment that names a scalar payload itself
    pub const VALUE_KEY: &'static str = "value";

    /// Create a null value
    #[must_use]
    pub const fn null() -> Self {
        Self::Scalar(Scalar::Null)
    }

    /// Create a numeric value
    #[must_use]
    pub const fn number(v: f64) -> Self {
        Self::Scalar(Scalar::Number(v))
    }

    /// Create a boolean value
    #[must_use]
    pub const fn bool(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }

    /// Create a text value
    #[must_use]
    pub fn text(v: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(v.into()))
    }

    /// Create an empty record
    #[must_use]
    pub fn record() -> Self {
        Self::Record(Record::new())
    }

    /// Short name of the value's shape, for error messages
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(Scalar::Null) => "null",
            Self::Scalar(Scalar::Bool(_)) => "bool",
            Self::Scalar(Scalar::Number(_)) => "number",
            Self::Scalar(Scalar::Text(_)) => "text",
            Self::Sequence(_) => "sequence",
            Self::Record(_) => "record",
        }
    }

    /// Whether this is a null scalar
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Scalar::Null))
    }

    /// Numeric view, if this is a number
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(Scalar::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Text view, if this is text
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Record view, if this is a record
    #[must_use]
    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Number of elements: sequence length, record key count, 1 for a
    /// non-null scalar, 0 for null
    #[must_use]
    pub fn element_count(&self) -> usize {
        match self {
            Self::Sequence(s) => s.len(),
            Self::Record(r) => r.len(),
            Self::Scalar(Scalar::Null) => 0,
            Self::Scalar(_) => 1,
        }
    }

    /// Truthiness used by rule conditions
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Scalar(Scalar::Null) => false,
            Self::Scalar(Scalar::Bool(b)) => *b,
            Self::Scalar(Scalar::Number(n)) => *n != 0.0 && !n.is_nan(),
            Self::Scalar(Scalar::Text(s)) => !s.is_empty(),
            Self::Sequence(s) => !s.is_empty(),
            Self::Record(r) => !r.is_empty(),
        }
    }

    /// Resolve a dotted path such as `summary.total` or `items.0.score`.
    ///
    /// The first segment `items` names a sequence payload and `value` names a
    /// scalar payload, so every payload shape can be addressed the same way.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&DataValue> {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let first = segments.next()?;

        let mut current = match self {
            Self::Record(r) => r.get(first)?,
            Self::Sequence(_) if first == Self::ITEMS_KEY => self,
            Self::Scalar(_) if first == Self::VALUE_KEY => self,
            _ => return None,
        };

        for segment in segments {
            current = match current {
                Self::Record(r) => r.get(segment)?,
                Self::Sequence(s) => s.get(segment.parse::<usize>().ok()?)?,
                Self::Scalar(_) => return None,
            };
        }
        Some(current)
    }

    /// Label used when this value keys a group or pivot cell
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Scalar(Scalar::Null) => "null".to_string(),
            Self::Scalar(Scalar::Bool(b)) => b.to_string(),
            Self::Scalar(Scalar::Number(n)) => format_number(*n),
            Self::Scalar(Scalar::Text(s)) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Integral numbers render without a fractional part
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl Default for DataValue {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        Self::number(v)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        Self::number(v as f64)
    }
}

impl From<usize> for DataValue {
    fn from(v: usize) -> Self {
        Self::number(v as f64)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        Self::bool(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        Self::text(v)
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        Self::text(v)
    }
}

impl From<Vec<DataValue>> for DataValue {
    fn from(v: Vec<DataValue>) -> Self {
        Self::Sequence(v)
    }
}

impl From<Record> for DataValue {
    fn from(v: Record) -> Self {
        Self::Record(v)
    }
}

impl From<serde_json::Value> for DataValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => Self::null(),
            Value::Bool(b) => Self::bool(b),
            Value::Number(n) => n.as_f64().map_or_else(Self::null, Self::number),
            Value::String(s) => Self::text(s),
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Record(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<DataValue> for serde_json::Value {
    fn from(v: DataValue) -> Self {
        match v {
            DataValue::Scalar(Scalar::Null) => Self::Null,
            DataValue::Scalar(Scalar::Bool(b)) => Self::Bool(b),
            DataValue::Scalar(Scalar::Number(n)) => {
                serde_json::Number::from_f64(n).map_or(Self::Null, Self::Number)
            }
            DataValue::Scalar(Scalar::Text(s)) => Self::String(s),
            DataValue::Sequence(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            DataValue::Record(r) => {
                Self::Object(r.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DataValue {
        DataValue::from(json!({
            "region": "emea",
            "summary": { "total": 42 },
            "items": [ { "score": 10 }, { "score": 20 } ]
        }))
    }

    #[test]
    fn test_deserialize_shapes() {
        let v: DataValue = serde_json::from_str("[1, 2, 3]").unwrap();
        assert_eq!(v.element_count(), 3);

        let v: DataValue = serde_json::from_str("{\"a\": 1}").unwrap();
        assert!(v.as_record().is_some());

        let v: DataValue = serde_json::from_str("null").unwrap();
        assert!(v.is_null());

        let v: DataValue = serde_json::from_str("7").unwrap();
        assert_eq!(v.as_f64(), Some(7.0));

        let v: DataValue = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(v.as_str(), Some("x"));
    }

    #[test]
    fn test_lookup_record_paths() {
        let v = sample();
        assert_eq!(v.lookup("summary.total").and_then(DataValue::as_f64), Some(42.0));
        assert_eq!(v.lookup("items.1.score").and_then(DataValue::as_f64), Some(20.0));
        assert!(v.lookup("summary.missing").is_none());
        assert!(v.lookup("").is_none());
    }

    #[test]
    fn test_lookup_root_aliases() {
        let seq = DataValue::from(json!([5, 6]));
        assert_eq!(seq.lookup("items"), Some(&seq));
        assert_eq!(seq.lookup("items.1").and_then(DataValue::as_f64), Some(6.0));

        let scalar = DataValue::number(3.0);
        assert_eq!(scalar.lookup("value"), Some(&scalar));
        assert!(scalar.lookup("other").is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!DataValue::null().is_truthy());
        assert!(!DataValue::number(0.0).is_truthy());
        assert!(DataValue::number(2.0).is_truthy());
        assert!(!DataValue::text("").is_truthy());
        assert!(DataValue::from(json!([1])).is_truthy());
        assert!(!DataValue::record().is_truthy());
    }

    #[test]
    fn test_element_count() {
        assert_eq!(sample().element_count(), 3);
        assert_eq!(DataValue::null().element_count(), 0);
        assert_eq!(DataValue::bool(false).element_count(), 1);
    }

    #[test]
    fn test_label() {
        assert_eq!(DataValue::number(3.0).label(), "3");
        assert_eq!(DataValue::number(2.5).label(), "2.5");
        assert_eq!(DataValue::text("eu").label(), "eu");
        assert_eq!(DataValue::null().label(), "null");
    }

    #[test]
    fn test_json_conversion_preserves_structure() {
        let original = json!({"a": [1, {"b": true}], "c": null, "d": "x"});
        let value = DataValue::from(original.clone());
        assert_eq!(serde_json::Value::from(value), json!({"a": [1.0, {"b": true}], "c": null, "d": "x"}));
        assert_eq!(serde_json::to_value(DataValue::from(original)).unwrap()["d"], json!("x"));
    }
}
