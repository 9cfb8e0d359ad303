//! Result aggregation

use serde::{Deserialize, Serialize};

use super::histogram::{LatencyHistogram, LatencySummary};
use crate::job::{JobError, JobErrorKind, JobId, JobResult};
use crate::worker::ResultStream;

/// First failure seen while draining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstError {
    pub job_id: JobId,
    pub error: JobError,
}

/// Counts over a drained result stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    /// Results received
    pub total: u64,
    pub succeeded: u64,
    /// Handler-reported failures
    pub failed: u64,
    /// Recovered panics
    pub internal_faults: u64,
    /// Handlers that gave up on cancellation
    pub cancelled: u64,
    /// First failure in stream order (not submission order)
    pub first_error: Option<FirstError>,
    /// Handler execution time
    pub latency: LatencySummary,
}

impl AggregateSummary {
    /// Failed results of any kind
    pub fn failures(&self) -> u64 {
        self.failed + self.internal_faults + self.cancelled
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures() == 0
    }
}

#[derive(Default)]
struct Tally {
    summary: AggregateSummary,
    latency: LatencyHistogram,
}

impl Tally {
    fn record<O>(&mut self, result: &JobResult<O>) {
        self.summary.total += 1;
        self.latency.record(result.elapsed);

        match &result.outcome {
            Ok(_) => self.summary.succeeded += 1,
            Err(error) => {
                match error.kind {
                    JobErrorKind::Failed => self.summary.failed += 1,
                    JobErrorKind::InternalFault => self.summary.internal_faults += 1,
                    JobErrorKind::Cancelled => self.summary.cancelled += 1,
                }
                if self.summary.first_error.is_none() {
                    self.summary.first_error = Some(FirstError {
                        job_id: result.job_id,
                        error: error.clone(),
                    });
                }
            }
        }
    }

    fn finish(mut self) -> AggregateSummary {
        self.summary.latency = self.latency.summary();
        self.summary
    }
}

/// Drains a [`ResultStream`] until the pool terminates
///
/// Every method consumes results only as fast as the caller, so backpressure
/// comes solely from the pool's result capacity.
///
/// # Example
///
/// ```ignore
/// let aggregator = ResultAggregator::new(pool.results()?);
/// let (results, summary) = aggregator.collect_with_summary().await;
/// if let Some(first) = summary.first_error {
///     tracing::warn!(job_id = %first.job_id, error = %first.error, "batch had failures");
/// }
/// ```
#[derive(Debug)]
pub struct ResultAggregator<O> {
    stream: ResultStream<O>,
}

impl<O> ResultAggregator<O> {
    pub fn new(stream: ResultStream<O>) -> Self {
        Self { stream }
    }

    /// Pull the next result
    pub async fn next(&mut self) -> Option<JobResult<O>> {
        self.stream.recv().await
    }

    /// Collect every result in emission order
    pub async fn collect(self) -> Vec<JobResult<O>> {
        let mut results = Vec::new();
        while let Some(result) = self.stream.recv().await {
            results.push(result);
        }
        results
    }

    /// Collect every result, ordered by job ID (submission order for a
    /// single submitter)
    pub async fn collect_ordered(self) -> Vec<JobResult<O>> {
        let mut results = self.collect().await;
        results.sort_by_key(|result| result.job_id);
        results
    }

    /// Push each result to `callback` as it arrives
    pub async fn for_each<F>(self, mut callback: F) -> AggregateSummary
    where
        F: FnMut(JobResult<O>),
    {
        let mut tally = Tally::default();
        while let Some(result) = self.stream.recv().await {
            tally.record(&result);
            callback(result);
        }
        tally.finish()
    }

    /// Drain the stream, keeping only counts
    pub async fn summary(self) -> AggregateSummary {
        self.for_each(drop).await
    }

    /// Collect every result along with its summary
    pub async fn collect_with_summary(self) -> (Vec<JobResult<O>>, AggregateSummary) {
        let mut results = Vec::new();
        let summary = self.for_each(|result| results.push(result)).await;
        (results, summary)
    }

    pub fn into_inner(self) -> ResultStream<O> {
        self.stream
    }
}
