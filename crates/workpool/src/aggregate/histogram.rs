//! Latency distribution over job execution times

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Latency histogram fed with per-job elapsed times
///
/// Safe to record into from several tasks at once.
#[derive(Debug)]
pub struct LatencyHistogram {
    /// Raw samples, sorted lazily for percentiles
    samples: Mutex<Vec<Duration>>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    min_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
        }
    }

    /// Record one sample
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        self.samples.lock().push(duration);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_micros.load(Ordering::Relaxed) / count)
    }

    pub fn min(&self) -> Duration {
        match self.min_micros.load(Ordering::Relaxed) {
            u64::MAX => Duration::ZERO,
            min => Duration::from_micros(min),
        }
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_micros.load(Ordering::Relaxed))
    }

    /// Percentile (0.0 to 1.0) using nearest rank
    pub fn percentile(&self, p: f64) -> Duration {
        let mut samples = self.samples.lock();
        if samples.is_empty() {
            return Duration::ZERO;
        }

        samples.sort_unstable();
        let rank = (samples.len() as f64 * p.clamp(0.0, 1.0)).ceil() as usize;
        samples[rank.saturating_sub(1).min(samples.len() - 1)]
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            mean: self.mean(),
            min: self.min(),
            max: self.max(),
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
        }
    }
}

/// Latency summary statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}
