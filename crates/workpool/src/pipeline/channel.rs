//! Hand-off channels connecting pipeline stages

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_util::task::TaskTracker;

/// Create a bounded hand-off with at least one slot
///
/// Capacity 1 is the single-slot hand-off: a producer can run at most one
/// item ahead of its consumer.
pub fn channel<T>(capacity: usize) -> (Sink<T>, Stream<T>) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    (Sink { tx }, Stream::new(rx))
}

/// Producing end of a stage hand-off
///
/// The channel closes when the last `Sink` clone is dropped, so a stage's
/// output closes however the stage ends.
#[derive(Debug)]
pub struct Sink<T> {
    tx: async_channel::Sender<T>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Sink<T> {
    /// Send an item, waiting while the channel is full
    ///
    /// Hands the item back if every consumer is gone.
    pub async fn send(&self, item: T) -> Result<(), T> {
        self.tx.send(item).await.map_err(|err| err.into_inner())
    }

    /// Whether every consumer is gone (or the channel was closed)
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming end of a stage hand-off
///
/// Clones share one buffer: each item is delivered to exactly one clone.
pub struct Stream<T> {
    rx: Pin<Box<async_channel::Receiver<T>>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self::new((*self.rx).clone())
    }
}

impl<T> Stream<T> {
    fn new(rx: async_channel::Receiver<T>) -> Self {
        Self { rx: Box::pin(rx) }
    }

    /// A stream fed from `items` by a generator task spawned on `tracker`
    ///
    /// The generator stops early if every consumer is dropped. Must be called
    /// from within a Tokio runtime.
    pub fn from_iter<I>(items: I, capacity: usize, tracker: &TaskTracker) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
    {
        let (sink, stream) = channel(capacity);
        tracker.spawn(generate(items.into_iter(), sink));
        stream
    }

    /// Receive the next item; `None` once the producer side is closed and
    /// the buffer is empty
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    /// Drain every remaining item
    pub async fn collect(self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }

    /// Whether every producer is gone; buffered items may remain
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> futures::Stream for Stream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.as_mut().poll_next(cx)
    }
}

impl<T> std::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("buffered", &self.rx.len())
            .field("closed", &self.rx.is_closed())
            .finish()
    }
}

/// Feed `items` into `sink` until exhausted or every consumer is gone
pub(crate) async fn generate<I, T>(items: I, sink: Sink<T>)
where
    I: Iterator<Item = T>,
{
    for item in items {
        if sink.send(item).await.is_err() {
            break;
        }
    }
}
