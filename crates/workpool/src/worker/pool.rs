//! Worker pool for job execution
//!
//! Runs a fixed number of workers over a shared [`JobQueue`], with graceful
//! close, abrupt cancellation and a join on every worker before termination.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace, warn};

use super::config::WorkerPoolConfig;
use super::results::ResultStream;
use super::stats::{PoolStats, WorkerGuard};
use crate::job::{DynJob, Job, JobContext, JobError, JobHandler, JobId, JobResult, Priority};
use crate::sync::{JobQueue, QueueError, QueueReceiver, RateLimitError, RateLimiter};

/// Worker pool status
///
/// Transitions only move forward: `Created → Running → Draining → Terminated`.
/// A terminated pool cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPoolStatus {
    /// Constructed, workers not spawned yet
    Created,
    /// Workers are running and jobs are accepted
    Running,
    /// No new jobs are accepted; workers finish queued work or abandon it on cancel
    Draining,
    /// Every worker has exited and the result stream is closed
    Terminated,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// `start` called on a pool that is already running
    #[error("worker pool is already started")]
    AlreadyStarted,

    /// Submission before `start`
    #[error("worker pool is not started")]
    NotStarted,

    /// Submission after `close` or `cancel`
    #[error("worker pool is closed")]
    Closed,

    /// The pool has terminated and cannot be restarted
    #[error("worker pool has terminated")]
    Terminated,

    /// Invalid configuration
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    /// The result stream was already handed out
    #[error("result stream already taken")]
    ResultsTaken,

    /// Non-blocking submission refused by the admission rate limit
    #[error("admission rate limit reached")]
    RateLimited,

    /// Workers did not drain before the shutdown deadline
    #[error("graceful shutdown timed out; {abandoned} queued jobs abandoned")]
    ShutdownTimeout { abandoned: u64 },

    /// Queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Rate limiter error
    #[error("rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),
}

struct Lifecycle<O> {
    status: WorkerPoolStatus,
    /// Handed to the workers by `start`; each worker holds a clone, so the
    /// stream closes when the last one exits
    result_tx: Option<async_channel::Sender<JobResult<O>>>,
    result_rx: Option<async_channel::Receiver<JobResult<O>>>,
    /// The untaken stream was dropped by `close` or `cancel`
    results_discarded: bool,
}

impl<O> Lifecycle<O> {
    /// Drop the result stream if nobody took it, so workers never block on it
    fn discard_untaken_results(&mut self) {
        if self.result_rx.take().is_some() {
            self.results_discarded = true;
        }
    }
}

/// Fixed-size pool of workers executing jobs from a bounded queue
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use workpool::prelude::*;
///
/// let pool = WorkerPool::new(3, 10, |_ctx: JobContext, n: u64| async move {
///     Ok::<_, JobError>(n * 2)
/// });
/// let results = pool.results().unwrap();
/// pool.start().unwrap();
///
/// for n in 0..10 {
///     pool.submit(n).await.unwrap();
/// }
/// pool.close().await.unwrap();
///
/// let summary = ResultAggregator::new(results).summary().await;
/// assert_eq!(summary.succeeded, 10);
/// assert_eq!(pool.live_workers(), 0);
/// # });
/// ```
pub struct WorkerPool<P, O> {
    config: WorkerPoolConfig,
    handler: Arc<dyn JobHandler<P, O>>,
    queue: JobQueue<Job<P>>,
    limiter: Option<RateLimiter>,
    next_id: AtomicU64,
    cancellation: CancellationToken,
    stats: Arc<PoolStats>,
    tracker: TaskTracker,
    lifecycle: Mutex<Lifecycle<O>>,
}

impl<P, O> WorkerPool<P, O>
where
    P: Send + 'static,
    O: Send + 'static,
{
    /// Create a pool with `workers` workers (at least one) and a job queue of
    /// `queue_capacity` (0 = strict hand-off)
    pub fn new(workers: usize, queue_capacity: usize, handler: impl JobHandler<P, O>) -> Self {
        let config = WorkerPoolConfig::new(workers.max(1), queue_capacity);
        Self::build(config, Arc::new(handler), CancellationToken::new(), None)
    }

    /// Create a pool from a full configuration
    pub fn with_config(
        config: WorkerPoolConfig,
        handler: impl JobHandler<P, O>,
    ) -> Result<Self, WorkerPoolError> {
        Self::with_cancellation(config, handler, &CancellationToken::new())
    }

    /// Create a pool that is also cancelled when `parent` is cancelled
    pub fn with_cancellation(
        config: WorkerPoolConfig,
        handler: impl JobHandler<P, O>,
        parent: &CancellationToken,
    ) -> Result<Self, WorkerPoolError> {
        config.validate()?;
        let limiter = config
            .rate_limit
            .clone()
            .map(RateLimiter::from_config)
            .transpose()?;

        Ok(Self::build(
            config,
            Arc::new(handler),
            parent.child_token(),
            limiter,
        ))
    }

    fn build(
        config: WorkerPoolConfig,
        handler: Arc<dyn JobHandler<P, O>>,
        cancellation: CancellationToken,
        limiter: Option<RateLimiter>,
    ) -> Self {
        let (result_tx, result_rx) = match config.result_capacity {
            Some(capacity) => async_channel::bounded(capacity),
            None => async_channel::unbounded(),
        };

        Self {
            queue: JobQueue::new(config.queue_capacity),
            config,
            handler,
            limiter,
            next_id: AtomicU64::new(0),
            cancellation,
            stats: Arc::new(PoolStats::new()),
            tracker: TaskTracker::new(),
            lifecycle: Mutex::new(Lifecycle {
                status: WorkerPoolStatus::Created,
                result_tx: Some(result_tx),
                result_rx: Some(result_rx),
                results_discarded: false,
            }),
        }
    }

    /// Spawn the workers
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self), fields(pool_id = %self.config.pool_id, workers = self.config.workers))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.status {
            WorkerPoolStatus::Created => {}
            WorkerPoolStatus::Running | WorkerPoolStatus::Draining => {
                return Err(WorkerPoolError::AlreadyStarted)
            }
            WorkerPoolStatus::Terminated => return Err(WorkerPoolError::Terminated),
        }

        let results = lifecycle
            .result_tx
            .take()
            .ok_or(WorkerPoolError::Terminated)?;

        for index in 0..self.config.workers {
            let worker = Worker {
                index,
                pool_id: self.config.pool_id.clone(),
                receiver: self.queue.receiver(),
                handler: Arc::clone(&self.handler),
                results: results.clone(),
                cancellation: self.cancellation.clone(),
                stats: Arc::clone(&self.stats),
                _guard: WorkerGuard::new(Arc::clone(&self.stats)),
            };
            self.tracker.spawn(worker.run());
        }

        lifecycle.status = WorkerPoolStatus::Running;

        info!(
            pool_id = %self.config.pool_id,
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            rate_limited = self.limiter.is_some(),
            "Worker pool started"
        );
        Ok(())
    }

    /// Submit a job with normal priority, waiting while the queue is full
    pub async fn submit(&self, payload: P) -> Result<JobId, WorkerPoolError> {
        self.submit_with_priority(payload, Priority::Normal).await
    }

    /// Submit a job, waiting for rate-limit admission and queue space
    ///
    /// Priority is advisory and does not reorder the queue.
    pub async fn submit_with_priority(
        &self,
        payload: P,
        priority: Priority,
    ) -> Result<JobId, WorkerPoolError> {
        self.check_accepting()?;

        if let Some(limiter) = &self.limiter {
            limiter
                .wait_with_cancel(&self.cancellation)
                .await
                .map_err(|_| WorkerPoolError::Closed)?;
        }

        let job_id = self.next_job_id();
        let job = Job::new(job_id, payload, priority);

        self.stats.job_submitted();
        let sent = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(WorkerPoolError::Closed),
            sent = self.queue.submit(job) => sent.map_err(Self::map_queue_error),
        };
        if let Err(err) = sent {
            self.stats.submission_failed();
            return Err(err);
        }

        trace!(pool_id = %self.config.pool_id, %job_id, %priority, "Job submitted");
        Ok(job_id)
    }

    /// Submit a job only if it can be admitted and enqueued without waiting
    ///
    /// With a rate limit configured, the admission slot is consumed even when
    /// the queue then turns out to be full.
    pub fn try_submit(&self, payload: P) -> Result<JobId, WorkerPoolError> {
        self.check_accepting()?;

        if let Some(limiter) = &self.limiter {
            if !limiter.allow() {
                return Err(WorkerPoolError::RateLimited);
            }
        }

        let job_id = self.next_job_id();
        self.stats.job_submitted();
        if let Err(err) = self
            .queue
            .try_submit(Job::new(job_id, payload, Priority::Normal))
        {
            self.stats.submission_failed();
            return Err(Self::map_queue_error(err));
        }

        trace!(pool_id = %self.config.pool_id, %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Take the result stream
    ///
    /// Can be taken once, before or after `start`. With a bounded result
    /// capacity a taken stream must be drained concurrently with `close`, or
    /// workers block on emission until the pool is cancelled.
    ///
    /// `cancel` always drops a stream that was never taken, and `close` does
    /// so when the result capacity is bounded; later calls fail with
    /// [`WorkerPoolError::Closed`].
    pub fn results(&self) -> Result<ResultStream<O>, WorkerPoolError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.result_rx.take() {
            Some(rx) => Ok(ResultStream::new(rx)),
            None if lifecycle.results_discarded => Err(WorkerPoolError::Closed),
            None => Err(WorkerPoolError::ResultsTaken),
        }
    }

    /// Graceful close: stop accepting jobs, let workers drain the queue, then
    /// wait for every worker to exit
    ///
    /// Idempotent and safe to call concurrently. Returns only once the pool
    /// has terminated.
    #[instrument(skip(self), fields(pool_id = %self.config.pool_id))]
    pub async fn close(&self) -> Result<(), WorkerPoolError> {
        self.queue.close();
        {
            let mut lifecycle = self.lifecycle.lock();
            let status = lifecycle.status;
            match status {
                WorkerPoolStatus::Created => {
                    lifecycle.result_tx = None;
                    lifecycle.status = WorkerPoolStatus::Terminated;
                    self.tracker.close();
                    info!(pool_id = %self.config.pool_id, "Worker pool closed before start");
                    return Ok(());
                }
                WorkerPoolStatus::Running => {
                    lifecycle.status = WorkerPoolStatus::Draining;
                    info!(pool_id = %self.config.pool_id, "Worker pool draining");
                }
                WorkerPoolStatus::Draining | WorkerPoolStatus::Terminated => {}
            }
            if self.config.result_capacity.is_some() {
                lifecycle.discard_untaken_results();
            }
        }

        self.tracker.close();
        self.tracker.wait().await;

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.status != WorkerPoolStatus::Terminated {
            lifecycle.status = WorkerPoolStatus::Terminated;
            let stats = self.stats.snapshot();
            info!(
                pool_id = %self.config.pool_id,
                submitted = stats.submitted,
                succeeded = stats.succeeded,
                failed = stats.failed + stats.faulted + stats.cancelled,
                abandoned = stats.abandoned,
                "Worker pool terminated"
            );
        }
        Ok(())
    }

    /// [`close`](Self::close) bounded by `timeout`
    ///
    /// If the workers have not drained by the deadline the pool is cancelled,
    /// running jobs are still awaited, and the number of queued jobs that were
    /// abandoned is reported.
    #[instrument(skip(self), fields(pool_id = %self.config.pool_id))]
    pub async fn close_with_timeout(&self, timeout: Duration) -> Result<(), WorkerPoolError> {
        if tokio::time::timeout(timeout, self.close()).await.is_ok() {
            return Ok(());
        }

        warn!(
            pool_id = %self.config.pool_id,
            timeout_ms = timeout.as_millis() as u64,
            "Graceful close timed out, cancelling"
        );

        let before = self.stats.abandoned();
        self.cancel();
        self.close().await?;

        Err(WorkerPoolError::ShutdownTimeout {
            abandoned: self.stats.abandoned() - before,
        })
    }

    /// [`close_with_timeout`](Self::close_with_timeout) using the configured
    /// shutdown timeout
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        self.close_with_timeout(self.config.shutdown_timeout).await
    }

    /// Abrupt cancellation
    ///
    /// Queued jobs are dropped without results and counted as abandoned.
    /// Running jobs finish and their results are emitted when the stream has
    /// room; a result that would block on a full stream is discarded. Job
    /// contexts see the cancellation. Does not wait for workers; follow with
    /// [`close`](Self::close) to join them.
    #[instrument(skip(self), fields(pool_id = %self.config.pool_id))]
    pub fn cancel(&self) {
        let first = !self.cancellation.is_cancelled();
        self.cancellation.cancel();
        self.queue.close();

        let abandoned = self.queue.drain().len();
        self.stats.jobs_abandoned(abandoned);

        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.status {
                WorkerPoolStatus::Created => {
                    lifecycle.result_tx = None;
                    lifecycle.status = WorkerPoolStatus::Terminated;
                }
                WorkerPoolStatus::Running => lifecycle.status = WorkerPoolStatus::Draining,
                WorkerPoolStatus::Draining | WorkerPoolStatus::Terminated => {}
            }
            lifecycle.discard_untaken_results();
        }
        self.tracker.close();

        if first {
            info!(pool_id = %self.config.pool_id, abandoned, "Worker pool cancelled");
        }
    }

    /// Current lifecycle status
    pub fn status(&self) -> WorkerPoolStatus {
        let status = self.lifecycle.lock().status;
        match status {
            WorkerPoolStatus::Running if self.cancellation.is_cancelled() => {
                WorkerPoolStatus::Draining
            }
            WorkerPoolStatus::Draining if self.tracker.is_closed() && self.tracker.is_empty() => {
                WorkerPoolStatus::Terminated
            }
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn pool_id(&self) -> &str {
        &self.config.pool_id
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Live counters for this pool
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Workers currently running; zero once the pool has terminated
    pub fn live_workers(&self) -> usize {
        self.stats.live_workers()
    }

    fn check_accepting(&self) -> Result<(), WorkerPoolError> {
        if self.cancellation.is_cancelled() {
            return Err(WorkerPoolError::Closed);
        }
        match self.lifecycle.lock().status {
            WorkerPoolStatus::Running => Ok(()),
            WorkerPoolStatus::Created => Err(WorkerPoolError::NotStarted),
            WorkerPoolStatus::Draining | WorkerPoolStatus::Terminated => {
                Err(WorkerPoolError::Closed)
            }
        }
    }

    fn next_job_id(&self) -> JobId {
        JobId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn map_queue_error(err: QueueError) -> WorkerPoolError {
        match err {
            QueueError::Closed | QueueError::Dropped => WorkerPoolError::Closed,
            other => WorkerPoolError::Queue(other),
        }
    }
}

impl<O> WorkerPool<DynJob<O>, O>
where
    O: Send + 'static,
{
    /// Create a pool whose execution function is bound per job at submission
    ///
    /// See [`submit_fn`](Self::submit_fn).
    pub fn dynamic(workers: usize, queue_capacity: usize) -> Self {
        Self::new(workers, queue_capacity, |ctx: JobContext, job: DynJob<O>| {
            job(ctx)
        })
    }

    /// Dynamic pool from a full configuration
    pub fn dynamic_with_config(config: WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        Self::with_config(config, |ctx: JobContext, job: DynJob<O>| job(ctx))
    }

    /// Submit a closure as the job
    pub async fn submit_fn<F, Fut>(&self, f: F) -> Result<JobId, WorkerPoolError>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<O, JobError>> + Send + 'static,
    {
        let job: DynJob<O> = Box::new(move |ctx: JobContext| f(ctx).boxed());
        self.submit(job).await
    }
}

impl<P, O> std::fmt::Debug for WorkerPool<P, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_id", &self.config.pool_id)
            .field("workers", &self.config.workers)
            .field("status", &self.lifecycle.lock().status)
            .field("queued", &self.queue.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    QueueClosed,
    Cancelled,
}

/// One execution unit
struct Worker<P, O> {
    index: usize,
    pool_id: String,
    receiver: QueueReceiver<Job<P>>,
    handler: Arc<dyn JobHandler<P, O>>,
    results: async_channel::Sender<JobResult<O>>,
    cancellation: CancellationToken,
    stats: Arc<PoolStats>,
    _guard: WorkerGuard,
}

impl<P, O> Worker<P, O>
where
    P: Send + 'static,
    O: Send + 'static,
{
    async fn run(self) {
        let reason = loop {
            let job = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => break ExitReason::Cancelled,
                job = self.receiver.dequeue() => match job {
                    Some(job) => job,
                    None => break ExitReason::QueueClosed,
                },
            };

            // Never start a job once cancellation has been signalled
            if self.cancellation.is_cancelled() {
                self.stats.jobs_abandoned(1);
                break ExitReason::Cancelled;
            }

            let result = self.execute(job).await;
            let job_id = result.job_id;

            // A full stream only holds a worker until the pool is cancelled
            let emitted = tokio::select! {
                biased;
                sent = self.results.send(result) => sent.is_ok(),
                _ = self.cancellation.cancelled() => false,
            };
            if !emitted {
                self.stats.result_discarded();
                debug!(
                    pool_id = %self.pool_id,
                    %job_id,
                    worker = self.index,
                    "Result could not be emitted, discarding"
                );
            }
        };

        if reason == ExitReason::Cancelled {
            let abandoned = self.receiver.drain().len();
            self.stats.jobs_abandoned(abandoned);
        }

        debug!(pool_id = %self.pool_id, worker = self.index, reason = ?reason, "Worker exited");
    }

    async fn execute(&self, job: Job<P>) -> JobResult<O> {
        let job_id = job.id();
        let ctx = JobContext::new(
            job_id,
            job.priority(),
            self.index,
            self.cancellation.child_token(),
        );

        trace!(pool_id = %self.pool_id, %job_id, worker = self.index, "Job started");
        self.stats.job_started();
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(self.handler.execute(ctx, job.into_payload()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let error = JobError::from_panic(panic);
                warn!(
                    pool_id = %self.pool_id,
                    %job_id,
                    worker = self.index,
                    error = %error,
                    "Job panicked, recovered at worker boundary"
                );
                Err(error)
            }
        };

        let elapsed = started.elapsed();
        self.stats.job_finished(outcome.as_ref().err());
        trace!(
            pool_id = %self.pool_id,
            %job_id,
            worker = self.index,
            elapsed_ms = elapsed.as_millis() as u64,
            success = outcome.is_ok(),
            "Job finished"
        );

        JobResult {
            job_id,
            outcome,
            elapsed,
            worker: self.index,
            cancel_observed: self.cancellation.is_cancelled(),
        }
    }
}
