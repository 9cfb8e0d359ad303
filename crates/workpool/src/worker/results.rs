//! Result stream handed to the caller of [`WorkerPool::results`](super::WorkerPool::results)

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::job::JobResult;

/// Stream of job results emitted by a pool's workers
///
/// Ends once every worker has exited, which happens exactly once per pool.
/// Can be drained with [`recv`](Self::recv) or through the [`Stream`] impl.
pub struct ResultStream<O> {
    rx: Pin<Box<async_channel::Receiver<JobResult<O>>>>,
}

impl<O> ResultStream<O> {
    pub(crate) fn new(rx: async_channel::Receiver<JobResult<O>>) -> Self {
        Self { rx: Box::pin(rx) }
    }

    /// Wait for the next result; `None` once the pool has terminated
    pub async fn recv(&self) -> Option<JobResult<O>> {
        self.rx.recv().await.ok()
    }

    /// Take a result if one is ready
    pub fn try_recv(&self) -> Option<JobResult<O>> {
        self.rx.try_recv().ok()
    }

    /// Whether every worker has exited
    ///
    /// Buffered results may still be pending; drain until `recv` returns `None`.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }

    /// Results buffered but not yet received
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<O> Stream for ResultStream<O> {
    type Item = JobResult<O>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.as_mut().poll_next(cx)
    }
}

impl<O> std::fmt::Debug for ResultStream<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("buffered", &self.rx.len())
            .field("closed", &self.rx.is_closed())
            .finish()
    }
}
