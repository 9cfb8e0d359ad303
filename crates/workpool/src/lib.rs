//! # Workpool
//!
//! A bounded concurrent job-processing engine for a single process.
//!
//! ## Features
//!
//! - **Fixed worker pool**: N workers pull from a bounded queue, with graceful close and abrupt
//!   cancellation
//! - **Fault isolation**: handler errors and panics become failed results, never pool faults
//! - **Backpressure**: bounded job queue and optional bounded result stream
//! - **Admission pacing**: fixed-interval or token-bucket rate limiting
//! - **Pipelines**: stage chains with mandatory closure propagation, fan-out and fan-in
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Submitters                            │
//! │          submit / try_submit (RateLimiter admission)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         JobQueue                             │
//! │      (bounded FIFO; capacity 0 = strict hand-off)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (N workers, CancellationToken, panics caught per job)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               ResultStream → ResultAggregator                │
//! │  (closed once, after the last worker exits)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use workpool::prelude::*;
//!
//! let pool = WorkerPool::new(4, 16, |_ctx: JobContext, path: String| async move {
//!     if path.is_empty() {
//!         return Err(JobError::failed("empty path"));
//!     }
//!     Ok(path.len())
//! });
//! let results = ResultAggregator::new(pool.results().unwrap());
//! pool.start().unwrap();
//!
//! for path in ["a.txt", "", "c.txt"] {
//!     pool.submit(path.to_string()).await.unwrap();
//! }
//! pool.close().await.unwrap();
//!
//! let summary = results.summary().await;
//! assert_eq!(summary.total, 3);
//! assert_eq!(summary.failed, 1);
//! # });
//! ```

pub mod aggregate;
pub mod job;
pub mod pipeline;
pub mod reliability;
pub mod sync;
pub mod worker;

mod duration_millis;

/// Prelude for common imports
pub mod prelude {
    pub use crate::aggregate::{AggregateSummary, ResultAggregator};
    pub use crate::job::{
        DynJob, JobContext, JobError, JobErrorKind, JobHandler, JobId, JobResult, Priority,
    };
    pub use crate::pipeline::{fan_in, fan_out, Pipeline, PipelineBuilder, PipelineError, Stage};
    pub use crate::reliability::RetryPolicy;
    pub use crate::sync::{RateLimitConfig, RateLimiter, Semaphore};
    pub use crate::worker::{
        ResultStream, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus,
    };
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use aggregate::{AggregateSummary, ResultAggregator};
pub use job::{JobContext, JobError, JobErrorKind, JobHandler, JobId, JobResult};
pub use pipeline::{fan_in, fan_out, Pipeline, PipelineError};
pub use reliability::RetryPolicy;
pub use sync::{JobQueue, QueueError, RateLimiter, Semaphore, SemaphoreError};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
