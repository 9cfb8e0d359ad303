//! Coordination primitives
//!
//! This module provides:
//! - [`Semaphore`] - Counting permits bounding concurrent access to a resource
//! - [`RateLimiter`] - Admission pacing (fixed interval or token bucket)
//! - [`JobQueue`] - Bounded FIFO hand-off between submitters and workers
//!
//! These are the only components with shared mutable state, and each exposes
//! it exclusively through its synchronized operations.

mod queue;
mod rate_limit;
mod semaphore;

pub use queue::{JobQueue, QueueError, QueueReceiver};
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
pub use semaphore::{Semaphore, SemaphoreError, SemaphorePermit};
