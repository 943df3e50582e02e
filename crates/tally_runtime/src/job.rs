//! Background aggregation jobs.

use crate::result::AggregationResult;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_core::{ErrorReport, JobId, Timestamp};
use tally_schema::AggregationType;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued
    Pending,
    /// A worker is applying rules
    Processing,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledgement returned when a job is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReceipt {
    /// New job id
    pub job_id: JobId,
    /// Always `pending`
    pub status: JobStatus,
    /// Submission time
    pub created_at: Timestamp,
}

/// A background aggregation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationJob {
    /// Job id
    pub id: JobId,
    /// Caller's business id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    /// Aggregation type of the request
    pub aggregation_type: AggregationType,
    /// Current state
    pub status: JobStatus,
    /// Percentage of rules processed
    pub progress: u8,
    /// Submission time
    pub created_at: Timestamp,
    /// When a worker picked it up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When it reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Result, once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<AggregationResult>>,
    /// Error, once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl AggregationJob {
    /// Create a pending job
    #[must_use]
    pub fn new(business_id: Option<String>, aggregation_type: AggregationType) -> Self {
        Self {
            id: JobId::new(),
            business_id,
            aggregation_type,
            status: JobStatus::Pending,
            progress: 0,
            created_at: Timestamp::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Receipt for this job
    #[must_use]
    pub fn receipt(&self) -> JobReceipt {
        JobReceipt {
            job_id: self.id,
            status: self.status,
            created_at: self.created_at,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), StoreError> {
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Move to `processing`
    ///
    /// # Errors
    ///
    /// Returns error unless the job is pending
    pub fn start(&mut self) -> Result<(), StoreError> {
        self.transition(JobStatus::Processing)?;
        self.started_at.get_or_insert_with(Timestamp::now);
        Ok(())
    }

    /// Raise progress; lower values are ignored
    ///
    /// # Errors
    ///
    /// Returns error if the job is terminal
    pub fn advance(&mut self, progress: u8) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: self.status,
            });
        }
        self.progress = self.progress.max(progress.min(100));
        Ok(())
    }

    /// Move to `completed` with a result
    ///
    /// # Errors
    ///
    /// Returns error unless the job is processing
    pub fn complete(&mut self, result: Arc<AggregationResult>) -> Result<(), StoreError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.completed_at = Some(Timestamp::now());
        self.result = Some(result);
        Ok(())
    }

    /// Move to `failed` with an error
    ///
    /// # Errors
    ///
    /// Returns error if the job is already terminal
    pub fn fail(&mut self, error: ErrorReport) -> Result<(), StoreError> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(Timestamp::now());
        self.error = Some(error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ErrorCategory;

    fn job() -> AggregationJob {
        AggregationJob::new(Some("acme".to_string()), AggregationType::Financial)
    }

    #[test]
    fn test_job_new_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.started_at.is_none());
        assert_eq!(job.receipt().status, JobStatus::Pending);
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = job();
        job.start().unwrap();
        let started = job.started_at;
        assert!(started.is_some());

        job.advance(40).unwrap();
        job.advance(10).unwrap();
        assert_eq!(job.progress, 40);

        job.fail(ErrorReport::new(ErrorCategory::Cancelled, "cancelled")).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.started_at, started);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_job_terminal_rejects_mutation() {
        let mut job = job();
        job.fail(ErrorReport::new(ErrorCategory::Cancelled, "cancelled")).unwrap();
        assert!(job.start().is_err());
        assert!(job.advance(50).is_err());
        assert!(job.fail(ErrorReport::new(ErrorCategory::InternalError, "x")).is_err());
        assert_eq!(job.error.as_ref().map(|e| e.category), Some(ErrorCategory::Cancelled));
    }

    #[test]
    fn test_job_cannot_complete_from_pending() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_job_status_serde() {
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
        let back: JobStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(back, JobStatus::Completed);
    }
}
