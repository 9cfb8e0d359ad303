//! Admission rate limiting
//!
//! Two policies are supported:
//! - **Fixed interval**: exactly one admission per tick. Waiters reserve slots
//!   in arrival order, so admissions are FIFO and spaced by at least the interval.
//! - **Token bucket**: up to `capacity` tokens, refilled at one token per
//!   `refill_interval`. Bursts up to `capacity` are admitted back to back.
//!
//! All arithmetic uses the monotonic Tokio clock, so wall-clock adjustments can
//! neither drive the token count negative nor refill past capacity.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// The cancellation signal fired while waiting for admission
    #[error("rate limit wait cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("invalid rate limit configuration: {0}")]
    InvalidConfig(String),
}

/// Rate limiting policy
///
/// # Example
///
/// ```
/// use workpool::sync::RateLimitConfig;
/// use std::time::Duration;
///
/// let config: RateLimitConfig = serde_json::from_str(
///     r#"{"policy": "token_bucket", "capacity": 10, "refill_interval": 100}"#,
/// ).unwrap();
/// assert_eq!(
///     config,
///     RateLimitConfig::TokenBucket { capacity: 10, refill_interval: Duration::from_millis(100) }
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RateLimitConfig {
    /// One admission per `interval`
    FixedInterval {
        #[serde(with = "crate::duration_millis")]
        interval: Duration,
    },

    /// Burst of `capacity`, refilled one token per `refill_interval`
    TokenBucket {
        capacity: u32,
        #[serde(with = "crate::duration_millis")]
        refill_interval: Duration,
    },
}

impl RateLimitConfig {
    /// Up to `burst` admissions per `interval`
    ///
    /// A burst of one is a fixed-interval limiter; other bursts use a token
    /// bucket refilling at `interval / burst`. A zero burst yields an empty
    /// bucket that [`validate`](Self::validate) rejects.
    pub fn per_interval(interval: Duration, burst: u32) -> Self {
        if burst == 1 {
            Self::FixedInterval { interval }
        } else {
            Self::TokenBucket {
                capacity: burst,
                refill_interval: interval / burst.max(1),
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RateLimitError> {
        match self {
            Self::FixedInterval { interval } if interval.is_zero() => Err(
                RateLimitError::InvalidConfig("interval must be greater than zero".into()),
            ),
            Self::TokenBucket { capacity: 0, .. } => Err(RateLimitError::InvalidConfig(
                "token bucket capacity must be at least 1".into(),
            )),
            Self::TokenBucket {
                refill_interval, ..
            } if refill_interval.is_zero() => Err(RateLimitError::InvalidConfig(
                "refill interval must be greater than zero".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
enum State {
    FixedInterval {
        interval: Duration,
        next_eligible: Instant,
    },
    TokenBucket {
        capacity: f64,
        refill_interval: Duration,
        tokens: f64,
        last_refill: Instant,
    },
}

enum Admission {
    Now,
    At(Instant),
    RetryAt(Instant),
}

impl State {
    fn refill(&mut self, now: Instant) {
        if let Self::TokenBucket {
            capacity,
            refill_interval,
            tokens,
            last_refill,
        } = self
        {
            let elapsed = now.saturating_duration_since(*last_refill);
            let earned = elapsed.as_secs_f64() / refill_interval.as_secs_f64();
            *tokens = (*tokens + earned).min(*capacity);
            *last_refill = now;
        }
    }
}

/// Paces admissions according to a [`RateLimitConfig`]
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use workpool::sync::RateLimiter;
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new(Duration::from_millis(100), 1).unwrap();
/// assert!(limiter.allow());
/// assert!(!limiter.allow()); // next slot is 100ms away
/// # });
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    /// At most `burst` admissions per `interval`
    ///
    /// Fails with [`RateLimitError::InvalidConfig`] for a zero interval or a
    /// zero burst.
    pub fn new(interval: Duration, burst: u32) -> Result<Self, RateLimitError> {
        Self::from_config(RateLimitConfig::per_interval(interval, burst))
    }

    /// Build a limiter from a validated configuration
    pub fn from_config(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RateLimitConfig) -> Self {
        let now = Instant::now();
        let state = match &config {
            RateLimitConfig::FixedInterval { interval } => State::FixedInterval {
                interval: *interval,
                next_eligible: now,
            },
            RateLimitConfig::TokenBucket {
                capacity,
                refill_interval,
            } => State::TokenBucket {
                capacity: f64::from(*capacity),
                refill_interval: *refill_interval,
                tokens: f64::from(*capacity),
                last_refill: now,
            },
        };

        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Non-blocking admission
    ///
    /// Returns `true` and consumes the slot (or token) if admission is allowed
    /// right now, `false` otherwise.
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.refill(now);

        match &mut *state {
            State::FixedInterval {
                interval,
                next_eligible,
            } => {
                if now >= *next_eligible {
                    *next_eligible = now + *interval;
                    true
                } else {
                    false
                }
            }
            State::TokenBucket { tokens, .. } => {
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Wait until admission is allowed
    pub async fn wait(&self) {
        loop {
            let next = {
                let now = Instant::now();
                let mut state = self.state.lock();
                state.refill(now);

                match &mut *state {
                    State::FixedInterval {
                        interval,
                        next_eligible,
                    } => {
                        // Slots are reserved under the lock, so callers are
                        // admitted in the order they got here
                        let slot = (*next_eligible).max(now);
                        *next_eligible = slot + *interval;
                        Admission::At(slot)
                    }
                    State::TokenBucket {
                        tokens,
                        refill_interval,
                        ..
                    } => {
                        if *tokens >= 1.0 {
                            *tokens -= 1.0;
                            Admission::Now
                        } else {
                            Admission::RetryAt(now + refill_interval.mul_f64(1.0 - *tokens))
                        }
                    }
                }
            };

            match next {
                Admission::Now => return,
                Admission::At(slot) => {
                    tokio::time::sleep_until(slot).await;
                    return;
                }
                Admission::RetryAt(deadline) => tokio::time::sleep_until(deadline).await,
            }
        }
    }

    /// Like [`wait`](Self::wait), but gives up when `cancel` fires
    pub async fn wait_with_cancel(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
            _ = self.wait() => Ok(()),
        }
    }

    /// Admissions available right now without waiting
    pub fn available_tokens(&self) -> u32 {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.refill(now);

        match &*state {
            State::FixedInterval { next_eligible, .. } => u32::from(now >= *next_eligible),
            State::TokenBucket { tokens, .. } => tokens.floor() as u32,
        }
    }
}
