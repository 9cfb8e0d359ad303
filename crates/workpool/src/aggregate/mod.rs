//! Result aggregation
//!
//! This module provides:
//! - [`ResultAggregator`] - Pull or push draining of a pool's
//!   [`ResultStream`](crate::worker::ResultStream)
//! - [`AggregateSummary`] - Success/failure/fault counts, first error, latency
//! - [`LatencyHistogram`] - Execution time distribution with percentiles
//!
//! Emission order across workers is not submission order; correlate results
//! by [`JobId`](crate::job::JobId) or use
//! [`ResultAggregator::collect_ordered`].

mod aggregator;
mod histogram;

pub use aggregator::{AggregateSummary, FirstError, ResultAggregator};
pub use histogram::{LatencyHistogram, LatencySummary};
