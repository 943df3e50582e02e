//! Background job scheduler.
//!
//! Submissions go into a bounded queue. A dispatcher task takes them off the
//! queue and runs each on its own task, at most `worker_count` at a time.
//! Every job gets a child of the scheduler's shutdown token, so cancelling a
//! job or shutting down the scheduler is observed between rule applications.

use crate::config::RuntimeConfig;
use crate::job::{AggregationJob, JobReceipt, JobStatus};
use crate::pipeline::AggregationPipeline;
use crate::request::AggregationRequest;
use crate::store::{JobPage, JobQuery, JobStats, JobStore};
use std::collections::HashMap;
use std::sync::Arc;
use tally_core::{AggregationError, ErrorReport, JobId, TallyResult, Timestamp};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A job waiting for a worker
#[derive(Debug)]
struct QueuedJob {
    id: JobId,
    request: AggregationRequest,
    cancel: CancellationToken,
}

type TokenMap = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

/// Runs aggregation jobs on a bounded worker pool
pub struct JobScheduler {
    config: RuntimeConfig,
    store: Arc<JobStore>,
    pipeline: Arc<AggregationPipeline>,
    queue: mpsc::Sender<QueuedJob>,
    tokens: TokenMap,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Start the dispatcher (and the eviction sweeper, if a TTL is
    /// configured). Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(
        pipeline: Arc<AggregationPipeline>,
        store: Arc<JobStore>,
        config: RuntimeConfig,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(config.queue_capacity);
        let tokens: TokenMap = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher {
            pipeline: Arc::clone(&pipeline),
            store: Arc::clone(&store),
            tokens: Arc::clone(&tokens),
            semaphore: Arc::new(Semaphore::new(config.worker_count)),
            shutdown: shutdown.clone(),
        };
        let mut tasks = vec![tokio::spawn(dispatcher.run(receiver))];

        if let Some(ttl) = config.job_ttl {
            let store = Arc::clone(&store);
            let shutdown = shutdown.clone();
            let interval = config.sweep_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let removed = store.purge_expired(ttl, Timestamp::now()).await;
                            if removed > 0 {
                                debug!(removed, "evicted expired jobs");
                            }
                        }
                    }
                }
            }));
        }

        info!(workers = config.worker_count, queue_capacity = config.queue_capacity, job_ttl = ?config.job_ttl, "job scheduler started");

        Self {
            config,
            store,
            pipeline,
            queue,
            tokens,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    /// Scheduler configuration
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The job store
    #[must_use]
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// The pipeline jobs run on
    #[must_use]
    pub fn pipeline(&self) -> &Arc<AggregationPipeline> {
        &self.pipeline
    }

    /// Whether the scheduler accepts work
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Token cancelled when the scheduler shuts down
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Validate and enqueue a request
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid request (no job is
    /// created), or `Unavailable` if the scheduler is shut down or the
    /// queue is full
    pub async fn submit(&self, request: AggregationRequest) -> TallyResult<JobReceipt> {
        if !self.is_running() {
            return Err(AggregationError::Unavailable {
                reason: "scheduler is shut down".to_string(),
            });
        }
        let aggregation_type = request.validate()?;

        let job = AggregationJob::new(request.business_id.clone(), aggregation_type);
        let receipt = job.receipt();
        let id = self.store.insert(job).await;

        let cancel = self.shutdown.child_token();
        self.tokens.lock().await.insert(id, cancel.clone());

        let queued = QueuedJob {
            id,
            request,
            cancel,
        };
        if let Err(err) = self.queue.try_send(queued) {
            self.tokens.lock().await.remove(&id);
            self.store.remove(&id).await;
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "job queue is full",
                mpsc::error::TrySendError::Closed(_) => "scheduler is shut down",
            };
            warn!(job_id = %id, reason, "job rejected");
            return Err(AggregationError::Unavailable {
                reason: reason.to_string(),
            });
        }

        info!(job_id = %id, aggregation_type = %aggregation_type, "job submitted");
        Ok(receipt)
    }

    /// Snapshot of a job
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub async fn get(&self, id: &JobId) -> TallyResult<AggregationJob> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| AggregationError::not_found("job", id.to_string()))
    }

    /// Filtered, paginated jobs
    pub async fn list(&self, query: &JobQuery) -> JobPage {
        self.store.list(query).await
    }

    /// Job counts per state
    pub async fn stats(&self) -> JobStats {
        self.store.stats().await
    }

    /// Cancel a job. Returns `false` if it had already finished.
    ///
    /// A pending job fails immediately; a processing job fails once its
    /// worker observes the cancellation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub async fn cancel(&self, id: &JobId) -> TallyResult<bool> {
        let job = self.get(id).await?;
        if job.status.is_terminal() {
            return Ok(false);
        }

        if let Some(token) = self.tokens.lock().await.remove(id) {
            token.cancel();
        }
        if job.status == JobStatus::Pending {
            // Ignored if a worker finished it in the meantime.
            let _ = self
                .store
                .fail(id, ErrorReport::from(&AggregationError::Cancelled))
                .await;
        }
        info!(job_id = %id, "job cancelled");
        Ok(true)
    }

    /// Stop accepting work, cancel running jobs and wait for the
    /// background tasks to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "scheduler task ended abnormally");
            }
        }
        info!("job scheduler stopped");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Takes jobs off the queue and hands them to workers
struct Dispatcher {
    pipeline: Arc<AggregationPipeline>,
    store: Arc<JobStore>,
    tokens: TokenMap,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    async fn run(self, mut receiver: mpsc::Receiver<QueuedJob>) {
        let mut workers = JoinSet::new();

        loop {
            let queued = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(queued) => queued,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.abandon(queued).await;
                    break;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = Worker {
                pipeline: Arc::clone(&self.pipeline),
                store: Arc::clone(&self.store),
                tokens: Arc::clone(&self.tokens),
            };
            workers.spawn(async move {
                let _permit = permit;
                worker.run(queued).await;
            });

            while let Some(joined) = workers.try_join_next() {
                if let Err(err) = joined {
                    warn!(error = %err, "job worker panicked");
                }
            }
        }

        receiver.close();
        while let Ok(queued) = receiver.try_recv() {
            self.abandon(queued).await;
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "job worker panicked");
            }
        }
    }

    /// Fail a job that never reached a worker
    async fn abandon(&self, queued: QueuedJob) {
        self.tokens.lock().await.remove(&queued.id);
        let _ = self
            .store
            .fail(&queued.id, ErrorReport::from(&AggregationError::Cancelled))
            .await;
    }
}

/// Executes one job
struct Worker {
    pipeline: Arc<AggregationPipeline>,
    store: Arc<JobStore>,
    tokens: TokenMap,
}

impl Worker {
    async fn run(self, queued: QueuedJob) {
        let id = queued.id;
        if let Err(err) = self.execute(&queued).await {
            let err = if queued.cancel.is_cancelled() {
                AggregationError::Cancelled
            } else {
                err
            };
            match &err {
                AggregationError::Cancelled => warn!(job_id = %id, "job cancelled"),
                other => warn!(job_id = %id, error = %other, "job failed"),
            }
            if let Err(store_err) = self.store.fail(&id, ErrorReport::from(&err)).await {
                debug!(job_id = %id, error = %store_err, "job already finished");
            }
        }
        self.tokens.lock().await.remove(&id);
    }

    async fn execute(&self, queued: &QueuedJob) -> TallyResult<()> {
        let id = &queued.id;
        if queued.cancel.is_cancelled() {
            return Err(AggregationError::Cancelled);
        }
        self.store.mark_processing(id).await?;
        debug!(job_id = %id, "job started");

        let mut run = self.pipeline.prepare(&queued.request)?;
        loop {
            if queued.cancel.is_cancelled() {
                return Err(AggregationError::Cancelled);
            }
            if run.step().is_none() {
                break;
            }
            self.store.set_progress(id, run.progress()).await?;
            tokio::task::yield_now().await;
        }

        let result = run.finish();
        let status = result.status;
        self.store.complete(id, Arc::new(result)).await?;
        info!(job_id = %id, status = %status, "job completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tally_core::{DataValue, ErrorCategory};
    use tally_rules::{AggregationRule, Operation};
    use tally_schema::{AggregationType, SchemaRegistry};

    fn scheduler(config: RuntimeConfig) -> JobScheduler {
        let pipeline = Arc::new(AggregationPipeline::new(Arc::new(SchemaRegistry::with_defaults())));
        JobScheduler::start(pipeline, Arc::new(JobStore::new()), config)
    }

    fn request() -> AggregationRequest {
        AggregationRequest::new(AggregationType::Performance, json!([4, 8, 15, 16, 23, 42]))
            .with_business_id("acme")
            .with_rules(vec![
                AggregationRule::new("*", Operation::Average),
                AggregationRule::new("*", Operation::Max),
            ])
    }

    async fn wait_terminal(scheduler: &JobScheduler, id: &JobId) -> AggregationJob {
        for _ in 0..200 {
            let job = scheduler.get(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let scheduler = scheduler(RuntimeConfig::default());
        let receipt = scheduler.submit(request()).await.unwrap();
        assert_eq!(receipt.status, JobStatus::Pending);

        let job = wait_terminal(&scheduler, &receipt.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(job.error.is_none());

        let result = job.result.unwrap();
        assert_eq!(result.summary.applied_count, 2);
        assert_eq!(result.aggregated_data.lookup("max").and_then(DataValue::as_f64), Some(42.0));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_request_creates_no_job() {
        let scheduler = scheduler(RuntimeConfig::default());
        let err = scheduler.submit(AggregationRequest::default()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ValidationError);
        assert!(scheduler.store().is_empty().await);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_unknown_job() {
        let scheduler = scheduler(RuntimeConfig::default());
        let err = scheduler.get(&JobId::new()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(scheduler.cancel(&JobId::new()).await.is_err());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_many_jobs_complete() {
        let scheduler = scheduler(RuntimeConfig::new().with_worker_count(2));
        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(scheduler.submit(request()).await.unwrap().job_id);
        }
        for id in &ids {
            assert_eq!(wait_terminal(&scheduler, id).await.status, JobStatus::Completed);
        }
        let stats = scheduler.stats().await;
        assert_eq!(stats.completed, 10);

        let page = scheduler
            .list(&JobQuery {
                business_id: Some("acme".to_string()),
                limit: Some(4),
                ..JobQuery::default()
            })
            .await;
        assert_eq!(page.total, 10);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items[0].id, ids[0]);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_noop() {
        let scheduler = scheduler(RuntimeConfig::default());
        let id = scheduler.submit(request()).await.unwrap().job_id;
        wait_terminal(&scheduler, &id).await;
        assert!(!scheduler.cancel(&id).await.unwrap());
        assert_eq!(scheduler.get(&id).await.unwrap().status, JobStatus::Completed);
        scheduler.shutdown().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancel_pending_job() {
        let scheduler = scheduler(RuntimeConfig::default());
        // On a current-thread runtime the dispatcher cannot run until we yield.
        let id = scheduler.submit(request()).await.unwrap().job_id;
        assert!(scheduler.cancel(&id).await.unwrap());

        let job = wait_terminal(&scheduler, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.map(|e| e.category), Some(ErrorCategory::Cancelled));
        assert!(job.result.is_none());
        scheduler.shutdown().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancel_processing_job_stops_at_rule_boundary() {
        let scheduler = scheduler(RuntimeConfig::default().with_worker_count(1));
        let rules: Vec<_> = (0..10_000)
            .map(|order| AggregationRule::new("*", Operation::Count).with_order(order))
            .collect();
        let request =
            AggregationRequest::new(AggregationType::Performance, json!([1, 2, 3])).with_rules(rules);
        let id = scheduler.submit(request).await.unwrap().job_id;

        // The worker yields after every rule, so this loop observes it mid-run.
        let mut job = scheduler.get(&id).await.unwrap();
        while job.status == JobStatus::Pending {
            tokio::task::yield_now().await;
            job = scheduler.get(&id).await.unwrap();
        }
        assert_eq!(job.status, JobStatus::Processing);
        let started_at = job.started_at;
        assert!(started_at.is_some());

        assert!(scheduler.cancel(&id).await.unwrap());

        let job = wait_terminal(&scheduler, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.map(|e| e.category), Some(ErrorCategory::Cancelled));
        assert!(job.result.is_none());
        assert_eq!(job.started_at, started_at);
        assert!(job.progress < 100);
        assert!(job.completed_at.is_some());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let scheduler = scheduler(RuntimeConfig::default());
        scheduler.shutdown().await;
        assert!(!scheduler.is_running());
        let err = scheduler.submit(request()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unavailable);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_queue_full_rejects() {
        let scheduler = scheduler(RuntimeConfig::new().with_queue_capacity(1));
        scheduler.submit(request()).await.unwrap();
        let err = scheduler.submit(request()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unavailable);
        assert_eq!(scheduler.store().len().await, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_shutdown_fails_queued_jobs() {
        let scheduler = scheduler(RuntimeConfig::default());
        let id = scheduler.submit(request()).await.unwrap().job_id;
        scheduler.shutdown().await;

        let job = scheduler.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.map(|e| e.category), Some(ErrorCategory::Cancelled));
    }

    #[tokio::test]
    async fn test_ttl_sweeper_evicts_finished_jobs() {
        let config = RuntimeConfig::new()
            .with_job_ttl(Duration::from_millis(1))
            .with_sweep_interval(Duration::from_millis(10));
        let scheduler = scheduler(config);
        let id = scheduler.submit(request()).await.unwrap().job_id;

        for _ in 0..200 {
            if scheduler.store().get(&id).await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(scheduler.store().get(&id).await.is_none());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let scheduler = scheduler(RuntimeConfig::default());
        let rules = (0..50)
            .map(|i| AggregationRule::new("*", Operation::Sum).with_parameter("as", format!("s{i}")))
            .collect();
        let id = scheduler
            .submit(AggregationRequest::new(AggregationType::Custom, json!([1, 2])).with_rules(rules))
            .await
            .unwrap()
            .job_id;

        let mut last = 0;
        loop {
            let job = scheduler.get(&id).await.unwrap();
            assert!(job.progress >= last);
            last = job.progress;
            if job.status.is_terminal() {
                assert_eq!(job.status, JobStatus::Completed);
                break;
            }
            tokio::task::yield_now().await;
        }
        scheduler.shutdown().await;
    }
}
