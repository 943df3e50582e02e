//! TALLY Runtime
//!
//! Runs aggregation requests through their rule sets, either inline or as
//! background jobs on a bounded worker pool.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod job;
pub mod pipeline;
pub mod request;
pub mod result;
pub mod scheduler;
pub mod store;

pub use config::RuntimeConfig;
pub use engine::AggregationEngine;
pub use job::{AggregationJob, JobReceipt, JobStatus};
pub use pipeline::{AggregationPipeline, PipelineRun, RuleOutcome};
pub use request::{AggregationRequest, TimeRange};
pub use result::{AggregationResult, AggregationStatus, AggregationSummary, RuleFailure};
pub use scheduler::JobScheduler;
pub use store::{JobPage, JobQuery, JobStats, JobStore, StoreError};
