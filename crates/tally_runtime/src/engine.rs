//! Aggregation engine.
//!
//! Ties the schema registry, the pipeline and the job scheduler together
//! behind the operations the service exposes.

use crate::config::RuntimeConfig;
use crate::job::{AggregationJob, JobReceipt};
use crate::pipeline::AggregationPipeline;
use crate::request::AggregationRequest;
use crate::result::AggregationResult;
use crate::scheduler::JobScheduler;
use crate::store::{JobPage, JobQuery, JobStats, JobStore};
use std::sync::Arc;
use tally_core::{JobId, TallyResult};
use tally_schema::{AggregationType, RuleSet, SchemaRegistry};

/// Entry point for inline aggregation, jobs and schema lookups
#[derive(Debug)]
pub struct AggregationEngine {
    registry: Arc<SchemaRegistry>,
    pipeline: Arc<AggregationPipeline>,
    scheduler: JobScheduler,
}

impl AggregationEngine {
    /// Start an engine with the built-in schemas. Must be called inside a
    /// Tokio runtime.
    #[must_use]
    pub fn start(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(SchemaRegistry::with_defaults()), config)
    }

    /// Start an engine over an existing registry
    #[must_use]
    pub fn with_registry(registry: Arc<SchemaRegistry>, config: RuntimeConfig) -> Self {
        let pipeline = Arc::new(AggregationPipeline::new(Arc::clone(&registry)));
        let scheduler = JobScheduler::start(Arc::clone(&pipeline), Arc::new(JobStore::new()), config);
        Self {
            registry,
            pipeline,
            scheduler,
        }
    }

    /// The schema registry
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// The job scheduler
    #[must_use]
    pub const fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Aggregate inline. Aborts with `Cancelled` if the engine shuts down
    /// mid-run.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid request
    pub fn aggregate(&self, request: &AggregationRequest) -> TallyResult<AggregationResult> {
        let cancel = self.scheduler.shutdown_token().child_token();
        self.pipeline.run(request, &cancel)
    }

    /// Queue a background aggregation
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid request, or `Unavailable`
    /// if no more work is accepted
    pub async fn submit(&self, request: AggregationRequest) -> TallyResult<JobReceipt> {
        self.scheduler.submit(request).await
    }

    /// Snapshot of a job
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub async fn job(&self, id: &JobId) -> TallyResult<AggregationJob> {
        self.scheduler.get(id).await
    }

    /// Filtered, paginated jobs
    pub async fn jobs(&self, query: &JobQuery) -> JobPage {
        self.scheduler.list(query).await
    }

    /// Cancel a job; `false` if it had already finished
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub async fn cancel(&self, id: &JobId) -> TallyResult<bool> {
        self.scheduler.cancel(id).await
    }

    /// Job counts per state
    pub async fn stats(&self) -> JobStats {
        self.scheduler.stats().await
    }

    /// Registered rule sets, optionally of one type
    #[must_use]
    pub fn schemas(&self, schema_type: Option<AggregationType>) -> Vec<Arc<RuleSet>> {
        self.registry.list(schema_type)
    }

    /// One rule set
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub fn schema(&self, id: &str) -> TallyResult<Arc<RuleSet>> {
        Ok(self.registry.get(id)?)
    }

    /// Stop the scheduler
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
