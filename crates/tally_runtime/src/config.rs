//! Runtime configuration.

use std::time::Duration;

/// Scheduler and job retention settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum jobs executing at once
    pub worker_count: usize,
    /// Jobs that may wait in the queue before submissions are refused
    pub queue_capacity: usize,
    /// Terminal jobs older than this are evicted; `None` keeps them forever
    pub job_ttl: Option<Duration>,
    /// How often the eviction sweep runs
    pub sweep_interval: Duration,
}

impl RuntimeConfig {
    /// Create a config with default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            job_ttl: None,
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Set worker count (at least one)
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set queue capacity (at least one)
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Enable eviction of terminal jobs
    #[must_use]
    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = Some(ttl);
        self
    }

    /// Set the eviction sweep interval
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}
