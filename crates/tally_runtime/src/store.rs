//! In-memory job store.

use crate::job::{AggregationJob, JobStatus};
use crate::result::AggregationResult;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tally_core::{AggregationError, ErrorReport, JobId, Timestamp};
use tally_schema::AggregationType;
use tokio::sync::RwLock;

/// Default page size
pub const DEFAULT_LIMIT: u32 = 20;

/// Largest accepted page size
pub const MAX_LIMIT: u32 = 100;

/// Job store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Unknown job id
    #[error("Job not found: {0}")]
    NotFound(JobId),
    /// Illegal state change
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Job id
        id: JobId,
        /// Current state
        from: JobStatus,
        /// Requested state
        to: JobStatus,
    },
}

impl From<StoreError> for AggregationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AggregationError::not_found("job", id.to_string()),
            other => AggregationError::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Filter and page selection for listing jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQuery {
    /// Only jobs for this business id
    #[serde(default)]
    pub business_id: Option<String>,
    /// Only jobs in this state
    #[serde(default)]
    pub status: Option<JobStatus>,
    /// Only jobs of this type
    #[serde(default)]
    pub aggregation_type: Option<AggregationType>,
    /// 1-based page number
    #[serde(default)]
    pub page: Option<u32>,
    /// Page size
    #[serde(default)]
    pub limit: Option<u32>,
}

impl JobQuery {
    /// Page number, at least 1
    #[must_use]
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size, clamped to `1..=MAX_LIMIT`
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    fn matches(&self, job: &AggregationJob) -> bool {
        self.business_id
            .as_deref()
            .is_none_or(|id| job.business_id.as_deref() == Some(id))
            && self.status.is_none_or(|s| job.status == s)
            && self.aggregation_type.is_none_or(|t| job.aggregation_type == t)
    }
}

/// One page of jobs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPage {
    /// Jobs on this page, oldest first
    pub items: Vec<AggregationJob>,
    /// Page number
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Jobs matching the filter
    pub total: usize,
    /// `ceil(total / limit)`
    pub total_pages: usize,
}

/// Job counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Pending jobs
    pub pending: usize,
    /// Processing jobs
    pub processing: usize,
    /// Completed jobs
    pub completed: usize,
    /// Failed jobs
    pub failed: usize,
}

impl JobStats {
    /// All jobs
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Jobs by id, in submission order
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<IndexMap<JobId, AggregationJob>>,
}

impl JobStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job
    pub async fn insert(&self, job: AggregationJob) -> JobId {
        let id = job.id;
        self.jobs.write().await.insert(id, job);
        id
    }

    /// Snapshot of a job
    pub async fn get(&self, id: &JobId) -> Option<AggregationJob> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Drop a job
    pub async fn remove(&self, id: &JobId) -> Option<AggregationJob> {
        self.jobs.write().await.shift_remove(id)
    }

    /// Number of stored jobs
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply a mutation to a job and return the updated snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the job is unknown or the mutation fails
    pub async fn update<F>(&self, id: &JobId, mutate: F) -> Result<AggregationJob, StoreError>
    where
        F: FnOnce(&mut AggregationJob) -> Result<(), StoreError>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        mutate(job)?;
        Ok(job.clone())
    }

    /// Mark a job as picked up by a worker
    ///
    /// # Errors
    ///
    /// Returns error if the job is unknown or not pending
    pub async fn mark_processing(&self, id: &JobId) -> Result<AggregationJob, StoreError> {
        self.update(id, AggregationJob::start).await
    }

    /// Raise a job's progress
    ///
    /// # Errors
    ///
    /// Returns error if the job is unknown or terminal
    pub async fn set_progress(&self, id: &JobId, progress: u8) -> Result<AggregationJob, StoreError> {
        self.update(id, |job| job.advance(progress)).await
    }

    /// Record a job's result
    ///
    /// # Errors
    ///
    /// Returns error if the job is unknown or not processing
    pub async fn complete(
        &self,
        id: &JobId,
        result: Arc<AggregationResult>,
    ) -> Result<AggregationJob, StoreError> {
        self.update(id, |job| job.complete(result)).await
    }

    /// Record a job's failure
    ///
    /// # Errors
    ///
    /// Returns error if the job is unknown or terminal
    pub async fn fail(&self, id: &JobId, error: ErrorReport) -> Result<AggregationJob, StoreError> {
        self.update(id, |job| job.fail(error)).await
    }

    /// Filter, then paginate
    pub async fn list(&self, query: &JobQuery) -> JobPage {
        let page = query.page();
        let limit = query.limit();
        let jobs = self.jobs.read().await;

        let matching: Vec<&AggregationJob> = jobs.values().filter(|j| query.matches(j)).collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page as usize - 1) * limit as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        JobPage {
            items,
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit as usize),
        }
    }

    /// Remove terminal jobs that finished more than `ttl` before `now`;
    /// returns how many were removed
    pub async fn purge_expired(&self, ttl: Duration, now: Timestamp) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job
                    .completed_at
                    .is_some_and(|done| done.is_older_than(ttl, &now)))
        });
        before - jobs.len()
    }

    /// Counts per state
    pub async fn stats(&self) -> JobStats {
        let jobs = self.jobs.read().await;
        jobs.values().fold(JobStats::default(), |mut stats, job| {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            stats
        })
    }
}
