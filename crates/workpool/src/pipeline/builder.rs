//! Linear pipelines of stages

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::channel::{channel, generate, Stream};
use super::fan::{fan_in, fan_out};
use super::stage::Stage;
use crate::job::JobError;

/// Pipeline errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// One or more stages panicked; each entry is `"<stage>: <message>"`
    #[error("pipeline stage panicked: {}", .0.join("; "))]
    StagePanicked(Vec<String>),
}

#[derive(Clone, Default)]
struct Tasks {
    tracker: TaskTracker,
    panics: Arc<Mutex<Vec<String>>>,
}

impl Tasks {
    fn spawn<F>(&self, name: String, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let panics = Arc::clone(&self.panics);
        self.tracker.spawn(async move {
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                let message = JobError::from_panic(panic).message;
                warn!(stage = %name, panic = %message, "Pipeline stage panicked");
                panics.lock().push(format!("{name}: {message}"));
            }
        });
    }
}

/// Builds a chain of stages, each on its own task, connected by bounded
/// hand-offs
///
/// Stage types may change along the chain. New stages use the current
/// capacity (default 1, a single-slot hand-off).
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use workpool::pipeline::PipelineBuilder;
///
/// let words = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];
/// let lengths = PipelineBuilder::from_iter(words)
///     .stage("len", |s: String| async move { s.len() })
///     .filter_map("skip-short", |n: usize| async move { (n > 1).then_some(n) })
///     .build()
///     .collect()
///     .await
///     .unwrap();
///
/// assert_eq!(lengths, vec![2, 3]);
/// # });
/// ```
pub struct PipelineBuilder<T> {
    current: Stream<T>,
    capacity: usize,
    stages: Vec<String>,
    tasks: Tasks,
}

impl<T> PipelineBuilder<T>
where
    T: Send + 'static,
{
    /// Start from an existing stream
    pub fn new(source: Stream<T>) -> Self {
        Self {
            current: source,
            capacity: 1,
            stages: Vec::new(),
            tasks: Tasks::default(),
        }
    }

    /// Start from a generator stage emitting `items`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let tasks = Tasks::default();
        let (sink, source) = channel(1);
        tasks.spawn("source".to_string(), generate(items.into_iter(), sink));

        Self {
            current: source,
            capacity: 1,
            stages: vec!["source".to_string()],
            tasks,
        }
    }

    /// Hand-off capacity for stages added after this call
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Append a mapping stage
    pub fn stage<U, F, Fut>(self, name: impl Into<String>, f: F) -> PipelineBuilder<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        self.then(Stage::map(name, f))
    }

    /// Append a stage that may drop items
    pub fn filter_map<U, F, Fut>(self, name: impl Into<String>, f: F) -> PipelineBuilder<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<U>> + Send + 'static,
    {
        self.then(Stage::filter_map(name, f))
    }

    /// Append a prepared stage
    pub fn then<U>(self, stage: Stage<T, U>) -> PipelineBuilder<U>
    where
        U: Send + 'static,
    {
        let Self {
            current,
            capacity,
            mut stages,
            tasks,
        } = self;

        let (sink, next) = channel(capacity);
        let name = stage.name().to_string();
        tasks.spawn(name.clone(), stage.run(current, sink));
        stages.push(name);

        PipelineBuilder {
            current: next,
            capacity,
            stages,
            tasks,
        }
    }

    /// Append `k` copies of `stage` fed by fan-out and merged by fan-in
    ///
    /// Output order across copies is not preserved.
    pub fn parallel<U>(self, stage: Stage<T, U>, k: usize) -> PipelineBuilder<U>
    where
        U: Send + 'static,
    {
        let Self {
            current,
            capacity,
            mut stages,
            tasks,
        } = self;

        let k = k.max(1);
        let outputs = fan_out(current, k)
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let (sink, output) = channel(capacity);
                let name = format!("{}[{index}]", stage.name());
                tasks.spawn(name, stage.clone().run(input, sink));
                output
            })
            .collect();

        let next = fan_in(outputs, capacity, &tasks.tracker);
        stages.push(format!("{}x{k}", stage.name()));

        PipelineBuilder {
            current: next,
            capacity,
            stages,
            tasks,
        }
    }

    pub fn build(self) -> Pipeline<T> {
        debug!(stages = ?self.stages, "Pipeline built");
        Pipeline {
            output: Some(self.current),
            stages: self.stages,
            tasks: self.tasks,
        }
    }
}

/// A running chain of stages
///
/// Closing the source eventually closes the output: every stage drops its
/// output when its input is exhausted.
pub struct Pipeline<T> {
    output: Option<Stream<T>>,
    stages: Vec<String>,
    tasks: Tasks,
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    /// Chain `stages` after `source`
    pub fn new(source: Stream<T>, stages: impl IntoIterator<Item = Stage<T>>) -> Self {
        stages
            .into_iter()
            .fold(PipelineBuilder::new(source), PipelineBuilder::then)
            .build()
    }

    pub fn builder(source: Stream<T>) -> PipelineBuilder<T> {
        PipelineBuilder::new(source)
    }

    /// Take the sink end of the pipeline
    pub fn output(&mut self) -> Option<Stream<T>> {
        self.output.take()
    }

    /// Stage names in order
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Stage and forwarder tasks still running
    pub fn active_tasks(&self) -> usize {
        self.tasks.tracker.len()
    }

    /// Wait for every stage to finish
    ///
    /// An output that was never taken is dropped first, which lets stages
    /// stop instead of blocking on a full hand-off.
    pub async fn join(mut self) -> Result<(), PipelineError> {
        self.output = None;
        self.tasks.tracker.close();
        self.tasks.tracker.wait().await;

        let panics = std::mem::take(&mut *self.tasks.panics.lock());
        if panics.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::StagePanicked(panics))
        }
    }

    /// Drain the output, then join
    pub async fn collect(mut self) -> Result<Vec<T>, PipelineError> {
        let items = match self.output.take() {
            Some(output) => output.collect().await,
            None => Vec::new(),
        };
        self.join().await?;
        Ok(items)
    }
}

impl<T> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .field("active_tasks", &self.tasks.tracker.len())
            .finish()
    }
}
