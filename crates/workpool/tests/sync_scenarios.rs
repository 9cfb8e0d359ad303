//! Semaphore and rate limiter timing under a paused clock

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use workpool::sync::{RateLimitConfig, RateLimitError, RateLimiter, Semaphore, SemaphoreError};

#[tokio::test(start_paused = true)]
async fn fixed_interval_admits_one_per_slot() {
    let limiter = RateLimiter::new(Duration::from_millis(100), 1).unwrap();
    let start = Instant::now();

    let mut admitted = Vec::new();
    for _ in 0..5 {
        limiter.wait().await;
        admitted.push(start.elapsed().as_millis());
    }

    assert_eq!(admitted, vec![0, 100, 200, 300, 400]);
}

#[tokio::test(start_paused = true)]
async fn token_bucket_allows_a_burst_then_paces() {
    let limiter = RateLimiter::from_config(RateLimitConfig::TokenBucket {
        capacity: 3,
        refill_interval: Duration::from_millis(50),
    })
    .unwrap();
    let start = Instant::now();

    for _ in 0..3 {
        limiter.wait().await;
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(!limiter.allow());

    limiter.wait().await;
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn cancelled_wait_returns_early() {
    let limiter = RateLimiter::new(Duration::from_secs(60), 1).unwrap();
    assert!(limiter.allow());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    assert_eq!(
        limiter.wait_with_cancel(&cancel).await,
        Err(RateLimitError::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn semaphore_bounds_concurrency_to_capacity() {
    let semaphore = Semaphore::new(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let semaphore = semaphore.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    // ceil(5 / 2) rounds of 20ms
    assert_eq!(start.elapsed(), Duration::from_millis(60));
    assert_eq!(semaphore.held(), 0);
    assert_eq!(semaphore.available(), 2);
}

#[tokio::test]
async fn closing_semaphore_fails_waiters() {
    let semaphore = Semaphore::new(1);
    let held = semaphore.acquire().await.unwrap();

    let waiter = {
        let semaphore = semaphore.clone();
        tokio::spawn(async move { semaphore.acquire().await.map(|_| ()) })
    };
    tokio::task::yield_now().await;

    semaphore.close();
    assert_eq!(waiter.await.unwrap(), Err(SemaphoreError::Closed));
    drop(held);
}
