//! Job and handler definitions

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{JobContext, JobError};

/// Identifier of a job, unique within one pool instance
///
/// Identifiers are handed out in submission order, so sorting results by
/// `JobId` recovers the order in which a single submitter enqueued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Advisory priority metadata
///
/// The queue is FIFO; priority is carried through to the handler and the
/// result but never reorders delivery.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A submitted unit of work
///
/// Owned by the submitter until enqueued, then by whichever worker dequeues it.
#[derive(Debug)]
pub struct Job<P> {
    id: JobId,
    payload: P,
    priority: Priority,
}

impl<P> Job<P> {
    pub(crate) fn new(id: JobId, payload: P, priority: Priority) -> Self {
        Self {
            id,
            payload,
            priority,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

/// Executes job payloads on behalf of the pool
///
/// Any `Fn(JobContext, P) -> impl Future<Output = Result<O, JobError>>` closure
/// implements this trait, so most callers never implement it by hand.
///
/// # Example
///
/// ```ignore
/// use workpool::prelude::*;
///
/// struct Resize;
///
/// #[async_trait]
/// impl JobHandler<Image, Thumbnail> for Resize {
///     async fn execute(&self, ctx: JobContext, image: Image) -> Result<Thumbnail, JobError> {
///         if ctx.is_cancelled() {
///             return Err(JobError::cancelled("resize skipped"));
///         }
///         Ok(image.thumbnail())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler<P, O>: Send + Sync + 'static
where
    P: Send + 'static,
    O: Send + 'static,
{
    /// Execute one job payload
    ///
    /// Errors become failed results. Panics are caught by the worker and
    /// reported as [`JobErrorKind::InternalFault`](super::JobErrorKind::InternalFault).
    async fn execute(&self, ctx: JobContext, payload: P) -> Result<O, JobError>;
}

#[async_trait]
impl<P, O, F, Fut> JobHandler<P, O> for F
where
    P: Send + 'static,
    O: Send + 'static,
    F: Fn(JobContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, JobError>> + Send + 'static,
{
    async fn execute(&self, ctx: JobContext, payload: P) -> Result<O, JobError> {
        (self)(ctx, payload).await
    }
}

/// A job whose execution function is bound at submission time
///
/// Used as the payload of a dynamic pool (see
/// [`WorkerPool::dynamic`](crate::worker::WorkerPool::dynamic)) so one pool can run
/// heterogeneous kinds of work that share an output type.
pub type DynJob<O> = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, Result<O, JobError>> + Send>;
