//! TALLY Rules
//!
//! Aggregation rules, the expression language used by rule conditions and
//! custom operations, and the pure rule evaluator.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod condition;
pub mod evaluator;
pub mod rule;

pub use condition::{ArithOp, CompareOp, ConditionError, Expr, Expression, Function};
pub use evaluator::{RuleError, RuleEvaluator, DEFAULT_PERCENTILE};
pub use rule::{AggregationRule, Operation, sorted_by_order};
