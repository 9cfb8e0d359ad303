//! Pipeline stages

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::channel::{channel, Sink, Stream};

type Transform<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Option<O>> + Send + Sync>;

/// A named transform from `I` to `O`
///
/// A transform returning `None` drops the item. Stages are cheap to clone;
/// clones share the transform, which is how parallel stages run K copies.
pub struct Stage<I, O = I> {
    name: String,
    transform: Transform<I, O>,
}

impl<I, O> Clone for Stage<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Stage mapping every item
    pub fn map<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        Self {
            name: name.into(),
            transform: Arc::new(move |item| f(item).map(Some).boxed()),
        }
    }

    /// Stage that may drop items
    pub fn filter_map<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<O>> + Send + 'static,
    {
        Self {
            name: name.into(),
            transform: Arc::new(move |item| f(item).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read `input` until it closes, transform, write to `output`
    ///
    /// Stops early when every downstream consumer is gone. `output` is
    /// dropped on return or unwind, which closes it once no other sink clone
    /// remains.
    pub(crate) async fn run(self, input: Stream<I>, output: Sink<O>) {
        let mut received = 0u64;
        let mut forwarded = 0u64;

        while let Some(item) = input.recv().await {
            received += 1;
            let Some(out) = (self.transform)(item).await else {
                continue;
            };
            if output.send(out).await.is_err() {
                debug!(stage = %self.name, "Downstream closed, stopping stage");
                break;
            }
            forwarded += 1;
        }

        debug!(stage = %self.name, received, forwarded, "Stage finished");
    }
}

impl<I, O> std::fmt::Debug for Stage<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// Run `stage` over `input` on a task spawned on `tracker`, returning its
/// output
///
/// The task ends once `input` closes (closing the output) or the output is
/// dropped. Must be called from within a Tokio runtime.
pub fn spawn_stage<I, O>(
    stage: Stage<I, O>,
    input: Stream<I>,
    capacity: usize,
    tracker: &TaskTracker,
) -> Stream<O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    let (sink, output) = channel(capacity);
    tracker.spawn(stage.run(input, sink));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_map_stage() {
        let tracker = TaskTracker::new();
        let input = Stream::from_iter(vec![1, 2, 3], 1, &tracker);
        let square = Stage::map("square", |n: u32| async move { n * n });
        let output = spawn_stage(square, input, 1, &tracker);
        assert_eq!(output.collect().await, vec![1, 4, 9]);
    }

    #[tokio::test]
    async fn test_filter_map_stage_drops_items() {
        let tracker = TaskTracker::new();
        let input = Stream::from_iter(1..=10, 4, &tracker);
        let evens = Stage::filter_map("evens", |n: u32| async move {
            (n % 2 == 0).then_some(n)
        });
        let output = spawn_stage(evens, input, 4, &tracker);
        assert_eq!(output.collect().await, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_output_closes_when_input_closes() {
        let tracker = TaskTracker::new();
        let (sink, input) = channel::<u32>(1);
        let output = spawn_stage(Stage::map("id", |n: u32| async move { n }), input, 1, &tracker);

        sink.send(7).await.unwrap();
        assert_eq!(output.recv().await, Some(7));

        drop(sink);
        assert_eq!(output.recv().await, None);

        tracker.close();
        tracker.wait().await;
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_stage_stops_when_output_dropped() {
        let tracker = TaskTracker::new();
        let (sink, input) = channel::<u32>(1);
        let output = spawn_stage(Stage::map("id", |n: u32| async move { n }), input, 1, &tracker);
        drop(output);

        // The stage exits on its next send, dropping its input
        sink.send(1).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !sink.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sink.send(2).await, Err(2));
    }

    #[test]
    fn test_stage_name() {
        let stage: Stage<u8> = Stage::map("parse", |b: u8| async move { b });
        assert_eq!(stage.name(), "parse");
        assert_eq!(stage.clone().name(), "parse");
    }
}
