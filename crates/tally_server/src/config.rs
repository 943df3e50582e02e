//! Server configuration.
//!
//! Every flag can also be set through a `TALLY_*` environment variable.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tally_runtime::RuntimeConfig;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "tally_server=info,tally_runtime=info,tower_http=info";

/// Command-line and environment settings for `tally-server`
#[derive(Debug, Clone, Parser)]
#[command(name = "tally-server")]
#[command(about = "Rule-based data aggregation service", long_about = None)]
#[command(version)]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(long, env = "TALLY_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Jobs executing at once
    #[arg(long, env = "TALLY_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Jobs that may wait before submissions are refused
    #[arg(long, env = "TALLY_QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    /// Evict finished jobs after this many seconds
    #[arg(long, env = "TALLY_JOB_TTL_SECS")]
    pub job_ttl_secs: Option<u64>,

    /// Seconds between eviction sweeps
    #[arg(long, env = "TALLY_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Allow cross-origin requests from any origin
    #[arg(long, env = "TALLY_PERMISSIVE_CORS")]
    pub permissive_cors: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "TALLY_LOG_JSON")]
    pub log_json: bool,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, env = "TALLY_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

impl ServerConfig {
    /// Scheduler settings derived from the flags
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        let config = RuntimeConfig::new()
            .with_worker_count(self.workers)
            .with_queue_capacity(self.queue_capacity)
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs.max(1)));
        match self.job_ttl_secs {
            Some(secs) => config.with_job_ttl(Duration::from_secs(secs)),
            None => config,
        }
    }
}
