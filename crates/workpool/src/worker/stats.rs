//! Pool statistics
//!
//! Lock-free counters describing pool activity. The live worker count doubles
//! as the execution-unit probe used to verify that shutdown leaks no workers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::job::{JobError, JobErrorKind};

/// Counters shared between a pool and its workers
#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    faulted: AtomicU64,
    cancelled: AtomicU64,
    abandoned: AtomicU64,
    discarded: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    live_workers: AtomicUsize,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counted before the job is enqueued, so `started <= submitted` holds
    pub(crate) fn job_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Release);
    }

    /// Undo [`job_submitted`](Self::job_submitted) for a job the queue refused
    pub(crate) fn submission_failed(&self) {
        self.submitted.fetch_sub(1, Ordering::Release);
    }

    pub(crate) fn job_started(&self) {
        self.started.fetch_add(1, Ordering::Release);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    pub(crate) fn job_finished(&self, error: Option<&JobError>) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        let counter = match error.map(|e| e.kind) {
            None => &self.succeeded,
            Some(JobErrorKind::Failed) => &self.failed,
            Some(JobErrorKind::InternalFault) => &self.faulted,
            Some(JobErrorKind::Cancelled) => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn jobs_abandoned(&self, count: usize) {
        self.abandoned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn result_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_spawned(&self) {
        self.live_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn worker_exited(&self) {
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Jobs accepted into the queue
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Jobs handed to a handler
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    /// Jobs that finished with any outcome
    pub fn completed(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.faulted.load(Ordering::Relaxed)
            + self.cancelled.load(Ordering::Relaxed)
    }

    /// Queued jobs dropped by cancellation without a result
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Finished jobs whose result could not be emitted: the stream was
    /// dropped, or the pool was cancelled while the stream was full
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Jobs currently inside a handler
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Workers currently running
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Acquire)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        // started first: every job it counts was already counted as submitted
        let started = self.started();
        PoolStatsSnapshot {
            submitted: self.submitted(),
            started,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            abandoned: self.abandoned(),
            discarded: self.discarded(),
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight.load(Ordering::Acquire),
            live_workers: self.live_workers(),
        }
    }
}

/// Serializable copy of [`PoolStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    pub submitted: u64,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub faulted: u64,
    pub cancelled: u64,
    pub abandoned: u64,
    pub discarded: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub live_workers: usize,
}

/// Counts one live worker from spawn until the worker ends, however it ends
pub(crate) struct WorkerGuard {
    stats: Arc<PoolStats>,
}

impl WorkerGuard {
    pub(crate) fn new(stats: Arc<PoolStats>) -> Self {
        stats.worker_spawned();
        Self { stats }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.stats.worker_exited();
    }
}
