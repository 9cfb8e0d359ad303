//! Worker pool for job execution
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed set of workers with graceful close and cancellation
//! - [`WorkerPoolConfig`] - Worker count, queue/result capacity, rate limit, shutdown timeout
//! - [`PoolStats`] - Job counters and the live worker probe
//! - [`ResultStream`] - Results emitted by the workers, closed after the last worker exits
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │                                                              │
//! │  submit ──► RateLimiter ──► JobQueue (bounded, MPMC)         │
//! │                                 │                            │
//! │                 ┌───────────────┼───────────────┐            │
//! │                 ▼               ▼               ▼            │
//! │            [Worker 0]      [Worker 1]  ...  [Worker N-1]     │
//! │             catch_unwind around the handler, per job         │
//! │                 │               │               │            │
//! │                 └───────────────┼───────────────┘            │
//! │                                 ▼                            │
//! │                           ResultStream                       │
//! │                                                              │
//! │  CancellationToken ─► every worker + every JobContext        │
//! │  TaskTracker       ─► close() joins all workers              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use workpool::prelude::*;
//!
//! let config = WorkerPoolConfig::new(8, 128)
//!     .with_pool_id("thumbnails")
//!     .with_rate_limit(RateLimitConfig::per_interval(Duration::from_secs(1), 50));
//!
//! let pool = WorkerPool::with_config(config, |ctx: JobContext, image: Image| async move {
//!     render_thumbnail(&ctx, image).await.map_err(JobError::from)
//! })?;
//!
//! let results = pool.results()?;
//! pool.start()?;
//!
//! for image in images {
//!     pool.submit(image).await?;
//! }
//!
//! // Graceful shutdown, escalating to cancellation after the configured timeout
//! pool.shutdown().await?;
//! ```

mod config;
mod pool;
mod results;
mod stats;

pub use config::WorkerPoolConfig;
pub use pool::{WorkerPool, WorkerPoolError, WorkerPoolStatus};
pub use results::ResultStream;
pub use stats::{PoolStats, PoolStatsSnapshot};
