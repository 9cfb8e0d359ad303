//! Bounded job queue
//!
//! A FIFO hand-off between submitters and workers built on an MPMC
//! [`async_channel`]. Workers each hold a cloned [`QueueReceiver`], so no lock is
//! held while a worker waits for work.
//!
//! Capacity zero means strict hand-off: [`JobQueue::submit`] returns only once a
//! worker has taken the item.

use futures::channel::oneshot;
use tracing::trace;

/// Queue errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue was closed; no further submissions are accepted
    #[error("queue closed")]
    Closed,

    /// The queue is at capacity (non-blocking submission only)
    #[error("queue full")]
    Full,

    /// A hand-off submission was discarded before any worker took it
    #[error("job dropped before a worker received it")]
    Dropped,
}

#[derive(Debug)]
struct Envelope<T> {
    item: T,
    handoff: Option<oneshot::Sender<()>>,
}

/// Bounded, ordered hand-off buffer
///
/// FIFO delivery holds for items submitted in sequence by one submitter.
/// After [`close`](Self::close), queued items remain deliverable but new
/// submissions fail with [`QueueError::Closed`].
#[derive(Debug)]
pub struct JobQueue<T> {
    tx: async_channel::Sender<Envelope<T>>,
    rx: async_channel::Receiver<Envelope<T>>,
    capacity: usize,
}

impl<T> JobQueue<T> {
    /// Create a queue holding at most `capacity` items (0 = strict hand-off)
    pub fn new(capacity: usize) -> Self {
        // The hand-off mode parks one envelope in a single slot and makes the
        // submitter wait for the receiver's acknowledgement
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self { tx, rx, capacity }
    }

    /// Enqueue an item, waiting while the queue is full
    pub async fn submit(&self, item: T) -> Result<(), QueueError> {
        if self.capacity > 0 {
            return self
                .tx
                .send(Envelope {
                    item,
                    handoff: None,
                })
                .await
                .map_err(|_| QueueError::Closed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                item,
                handoff: Some(ack_tx),
            })
            .await
            .map_err(|_| QueueError::Closed)?;

        ack_rx.await.map_err(|_| QueueError::Dropped)
    }

    /// Enqueue an item only if there is room right now
    ///
    /// On a zero-capacity queue the item takes the hand-off slot if it is free,
    /// without waiting for a worker to acknowledge it.
    pub fn try_submit(&self, item: T) -> Result<(), QueueError> {
        self.tx
            .try_send(Envelope {
                item,
                handoff: None,
            })
            .map_err(|err| match err {
                async_channel::TrySendError::Full(_) => QueueError::Full,
                async_channel::TrySendError::Closed(_) => QueueError::Closed,
            })
    }

    /// Stop accepting submissions; returns `true` if this call closed the queue
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Configured capacity (0 = strict hand-off)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items waiting to be dequeued
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// A new consumer handle
    pub fn receiver(&self) -> QueueReceiver<T> {
        QueueReceiver {
            rx: self.rx.clone(),
        }
    }

    /// Remove and return every item still queued
    pub fn drain(&self) -> Vec<T> {
        self.receiver().drain()
    }
}

/// Consumer side of a [`JobQueue`]
///
/// Each item is delivered to exactly one receiver.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: async_channel::Receiver<Envelope<T>>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Wait for the next item
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn dequeue(&self) -> Option<T> {
        let envelope = self.rx.recv().await.ok()?;
        Some(Self::accept(envelope))
    }

    /// Take the next item if one is waiting
    pub fn try_dequeue(&self) -> Option<T> {
        self.rx.try_recv().ok().map(Self::accept)
    }

    /// Remove and return every item still queued
    ///
    /// Drained hand-off submissions are not acknowledged; their submitters see
    /// [`QueueError::Dropped`].
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            items.push(envelope.item);
        }
        if !items.is_empty() {
            trace!(count = items.len(), "drained queued items");
        }
        items
    }

    fn accept(envelope: Envelope<T>) -> T {
        if let Some(ack) = envelope.handoff {
            let _ = ack.send(());
        }
        envelope.item
    }
}
