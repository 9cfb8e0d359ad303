//! Worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pool::WorkerPoolError;
use crate::sync::RateLimitConfig;

/// Worker pool configuration
///
/// The worker count is fixed for the lifetime of a pool built from this config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Pool identifier used in logs (generated if not provided)
    pub pool_id: String,

    /// Number of workers spawned by `start`
    pub workers: usize,

    /// Job queue capacity (0 = strict hand-off)
    pub queue_capacity: usize,

    /// Result channel capacity; `None` never blocks workers on emission
    #[serde(default)]
    pub result_capacity: Option<usize>,

    /// Admission rate limit applied to `submit`
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,

    /// Deadline used by `shutdown` before escalating to cancellation
    #[serde(with = "crate::duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            pool_id: format!("pool-{}", Uuid::now_v7()),
            workers,
            queue_capacity: 64,
            result_capacity: None,
            rate_limit: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with the given worker count and queue capacity
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Default::default()
        }
    }

    /// Set the pool ID
    pub fn with_pool_id(mut self, id: impl Into<String>) -> Self {
        self.pool_id = id.into();
        self
    }

    /// Set the worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the job queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Bound the result channel so slow consumers throttle the workers
    pub fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = Some(capacity);
        self
    }

    /// Pace job admission
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Check the configuration for values a pool cannot run with
    pub fn validate(&self) -> Result<(), WorkerPoolError> {
        if self.workers == 0 {
            return Err(WorkerPoolError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }

        if self.result_capacity == Some(0) {
            return Err(WorkerPoolError::InvalidConfig(
                "result_capacity must be at least 1 when set".to_string(),
            ));
        }

        if let Some(rate_limit) = &self.rate_limit {
            rate_limit
                .validate()
                .map_err(|e| WorkerPoolError::InvalidConfig(e.to_string()))?;
        }

        Ok(())
    }
}
