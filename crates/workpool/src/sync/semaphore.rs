//! Counting semaphore
//!
//! Wraps [`tokio::sync::Semaphore`] with held-permit accounting so that
//! over-release can be detected instead of silently inflating capacity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Semaphore errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SemaphoreError {
    /// The cancellation signal fired before a permit was obtained
    #[error("acquire cancelled before a permit was available")]
    Cancelled,

    /// The semaphore was closed
    #[error("semaphore is closed")]
    Closed,
}

#[derive(Debug)]
struct Inner {
    permits: Arc<tokio::sync::Semaphore>,
    capacity: usize,
    held: AtomicUsize,
    /// Permits detached with `forget` and not yet released
    forgotten: AtomicUsize,
}

/// Counting permit primitive
///
/// `held() <= capacity()` holds at all times. Cloning yields another handle
/// to the same permits.
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use workpool::sync::Semaphore;
///
/// let sem = Semaphore::new(2);
/// let permit = sem.acquire().await.unwrap();
/// assert_eq!(sem.held(), 1);
/// drop(permit); // released
/// assert_eq!(sem.held(), 0);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

impl Semaphore {
    /// Create a semaphore with `capacity` permits
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(tokio::sync::Semaphore::new(capacity)),
                capacity,
                held: AtomicUsize::new(0),
                forgotten: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait until a permit is available and take it
    pub async fn acquire(&self) -> Result<SemaphorePermit, SemaphoreError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| SemaphoreError::Closed)?;
        Ok(self.track(permit))
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires
    ///
    /// A cancelled acquire never consumes a permit.
    pub async fn acquire_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SemaphorePermit, SemaphoreError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SemaphoreError::Cancelled),
            permit = self.acquire() => permit,
        }
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.track(permit))
    }

    /// Return a permit previously detached with [`SemaphorePermit::forget`]
    ///
    /// Only forgotten permits can be released this way; permits still held by
    /// a guard go back when the guard drops. Releasing anything else is a
    /// caller error: it panics in debug builds and is logged and ignored in
    /// release builds.
    pub fn release(&self) {
        let released = self
            .inner
            .forgotten
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| f.checked_sub(1));

        match released {
            Ok(_) => {
                self.inner.held.fetch_sub(1, Ordering::AcqRel);
                self.inner.permits.add_permits(1);
            }
            Err(_) => {
                warn!(
                    capacity = self.inner.capacity,
                    "semaphore released more permits than were acquired"
                );
                debug_assert!(false, "semaphore released more permits than were acquired");
            }
        }
    }

    /// Close the semaphore; pending and future acquires fail with `Closed`
    pub fn close(&self) {
        self.inner.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Configured number of permits
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Permits currently held
    pub fn held(&self) -> usize {
        self.inner.held.load(Ordering::Acquire)
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> SemaphorePermit {
        self.inner.held.fetch_add(1, Ordering::AcqRel);
        SemaphorePermit {
            permit: Some(permit),
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A held permit, released on drop
#[derive(Debug)]
#[must_use = "dropping the permit releases it immediately"]
pub struct SemaphorePermit {
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<Inner>,
}

impl SemaphorePermit {
    /// Keep the permit held without a guard
    ///
    /// The permit stays counted as held until [`Semaphore::release`] is called.
    pub fn forget(mut self) {
        if let Some(permit) = self.permit.take() {
            self.inner.forgotten.fetch_add(1, Ordering::AcqRel);
            permit.forget();
        }
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        // held is decremented before the permit goes back, so held never
        // exceeds capacity even transiently
        if let Some(permit) = self.permit.take() {
            self.inner.held.fetch_sub(1, Ordering::AcqRel);
            drop(permit);
        }
    }
}
