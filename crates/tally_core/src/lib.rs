//! TALLY Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Everything the aggregation engine passes between crates lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod time;
pub mod value;
pub mod version;

// Re-exports
pub use error::{AggregationError, ErrorCategory, ErrorReport, TallyResult};
pub use id::{AggregationId, IdError, JobId};
pub use time::Timestamp;
pub use value::{DataValue, Record, Scalar};
pub use version::{Version, VersionError};
