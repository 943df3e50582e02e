//! TALLY Schemas
//!
//! Named, versioned rule sets and the registry that owns them.
//! Readers always receive an immutable snapshot of a rule set.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod defaults;
pub mod registry;
pub mod schema;

pub use defaults::{BUSINESS_METRICS_DEFAULT, RISK_ASSESSMENT_DEFAULT, default_rule_sets};
pub use registry::{RegistryError, SchemaRegistry};
pub use schema::{AggregationType, RuleSet, UnknownTypeError};
