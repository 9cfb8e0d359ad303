//! Job execution context

use tokio_util::sync::CancellationToken;

use super::{JobId, Priority};

/// Context provided to a handler for each job execution
///
/// The context provides:
/// - The job identifier and its advisory priority
/// - The index of the worker running the job
/// - Cooperative cancellation, tied to the pool's cancellation signal
///
/// Cancellation is advisory: the pool never interrupts a running handler, but
/// long-running handlers can observe the signal and stop early.
///
/// # Example
///
/// ```ignore
/// async fn crawl(ctx: JobContext, urls: Vec<Url>) -> Result<usize, JobError> {
///     let mut fetched = 0;
///     for url in urls {
///         tokio::select! {
///             _ = ctx.cancelled() => return Err(JobError::cancelled("crawl interrupted")),
///             page = fetch(url) => { page?; fetched += 1; }
///         }
///     }
///     Ok(fetched)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    priority: Priority,
    worker: usize,
    cancellation: CancellationToken,
}

impl JobContext {
    /// Create a new job context
    pub fn new(
        job_id: JobId,
        priority: Priority,
        worker: usize,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            priority,
            worker,
            cancellation,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Index of the worker executing this job (0-based)
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once cancellation is requested
    ///
    /// Useful in `select!` to abandon slow work:
    ///
    /// ```ignore
    /// tokio::select! {
    ///     out = do_work() => out,
    ///     _ = ctx.cancelled() => Err(JobError::cancelled("stopped")),
    /// }
    /// ```
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Token for handing to nested work (derive per-job deadlines from it)
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
