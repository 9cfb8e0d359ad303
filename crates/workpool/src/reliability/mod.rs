//! Reliability helpers layered on top of the pool
//!
//! This module provides:
//! - [`RetryPolicy`] - Exponential or fixed backoff for resubmitting failed jobs

mod retry;

pub use retry::RetryPolicy;
