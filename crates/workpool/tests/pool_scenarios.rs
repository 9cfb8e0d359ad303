//! Worker pool behavior under close, cancellation, faults and backpressure

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use workpool::prelude::*;

fn sleeper(ms: u64) -> WorkerPool<u64, u64> {
    WorkerPool::new(3, 10, move |_ctx: JobContext, n: u64| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, JobError>(n)
    })
}

#[tokio::test(start_paused = true)]
async fn three_workers_drain_ten_jobs_on_close() {
    let pool = sleeper(10);
    let results = pool.results().unwrap();
    pool.start().unwrap();

    let started = Instant::now();
    let mut submitted = HashSet::new();
    for n in 0..10 {
        submitted.insert(pool.submit(n).await.unwrap());
    }
    pool.close().await.unwrap();
    let elapsed = started.elapsed();

    let collected = ResultAggregator::new(results).collect().await;
    assert_eq!(collected.len(), 10);
    assert!(collected.iter().all(JobResult::is_success));

    let returned: HashSet<_> = collected.iter().map(|r| r.job_id).collect();
    assert_eq!(returned, submitted);

    // ceil(10 / 3) rounds of 10ms
    assert!(elapsed >= Duration::from_millis(40), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(50), "elapsed {elapsed:?}");

    assert_eq!(pool.live_workers(), 0);
    assert_eq!(pool.status(), WorkerPoolStatus::Terminated);
}

#[test_log::test(tokio::test)]
async fn cancel_after_first_job_keeps_in_flight_result() {
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let pool = WorkerPool::new(2, 10, move |ctx: JobContext, n: u32| {
        let started_tx = started_tx.clone();
        async move {
            let _ = started_tx.send(ctx.job_id());
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, JobError>(n)
        }
    });
    let results = pool.results().unwrap();
    pool.start().unwrap();

    let first = pool.submit(0).await.unwrap();
    assert_eq!(started_rx.recv().await, Some(first));
    pool.cancel();

    for n in 1..5 {
        assert!(matches!(pool.submit(n).await, Err(WorkerPoolError::Closed)));
    }

    pool.close().await.unwrap();
    let collected = ResultAggregator::new(results).collect().await;

    assert!((1..=5).contains(&collected.len()));
    assert_eq!(collected[0].job_id, first);
    assert!(collected[0].is_success());
    assert!(collected[0].cancel_observed);
    assert_eq!(pool.live_workers(), 0);
}

#[test_log::test(tokio::test)]
async fn cancel_drops_queued_jobs_without_results() {
    let gate = Arc::new(Notify::new());
    let pool = WorkerPool::new(1, 8, {
        let gate = Arc::clone(&gate);
        move |ctx: JobContext, n: u32| {
            let gate = Arc::clone(&gate);
            async move {
                if n == 0 {
                    gate.notify_one();
                    ctx.cancelled().await;
                    return Err(JobError::cancelled("observed pool cancellation"));
                }
                Ok(n)
            }
        }
    });
    let results = pool.results().unwrap();
    pool.start().unwrap();

    pool.submit(0).await.unwrap();
    gate.notified().await;
    for n in 1..=5 {
        pool.submit(n).await.unwrap();
    }

    pool.cancel();
    pool.close().await.unwrap();

    let collected = ResultAggregator::new(results).collect().await;
    assert_eq!(collected.len(), 1);
    assert_eq!(
        collected[0].error().map(|e| e.kind),
        Some(JobErrorKind::Cancelled)
    );

    let stats = pool.stats().snapshot();
    assert_eq!(stats.submitted, 6);
    assert_eq!(stats.started, 1);
    assert_eq!(stats.abandoned, 5);
    assert_eq!(stats.cancelled, 1);
}

#[test_log::test(tokio::test)]
async fn internal_fault_does_not_stop_the_pool() {
    let pool = WorkerPool::new(1, 8, |_ctx: JobContext, n: i32| async move {
        if n < 0 {
            panic!("negative input {n}");
        }
        Ok::<_, JobError>(n * 10)
    });
    let results = pool.results().unwrap();
    pool.start().unwrap();

    let faulty = pool.submit(-1).await.unwrap();
    for n in 1..=3 {
        pool.submit(n).await.unwrap();
    }
    pool.close().await.unwrap();

    let ordered = ResultAggregator::new(results).collect_ordered().await;
    assert_eq!(ordered.len(), 4);

    let fault = ordered[0].error().unwrap();
    assert_eq!(ordered[0].job_id, faulty);
    assert_eq!(fault.kind, JobErrorKind::InternalFault);
    assert!(fault.message.contains("negative input -1"));

    let outputs: Vec<_> = ordered[1..].iter().filter_map(|r| r.output().copied()).collect();
    assert_eq!(outputs, vec![10, 20, 30]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_close_loses_and_duplicates_nothing() {
    let pool = Arc::new(WorkerPool::new(4, 16, |_ctx: JobContext, n: u64| async move {
        tokio::time::sleep(Duration::from_micros(n % 7 * 100)).await;
        Ok::<_, JobError>(n)
    }));
    let results = pool.results().unwrap();
    pool.start().unwrap();

    let drain = tokio::spawn(ResultAggregator::new(results).collect());

    // Four concurrent submitters
    let mut submitters = Vec::new();
    for s in 0..4u64 {
        let pool = Arc::clone(&pool);
        submitters.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for n in 0..50 {
                ids.push(pool.submit(s * 1000 + n).await.unwrap());
            }
            ids
        }));
    }

    let mut submitted = HashSet::new();
    for submitter in submitters {
        submitted.extend(submitter.await.unwrap());
    }
    pool.close().await.unwrap();

    let collected = drain.await.unwrap();
    assert_eq!(collected.len(), 200);

    let mut seen = HashSet::new();
    for result in &collected {
        assert!(seen.insert(result.job_id), "duplicate result for {}", result.job_id);
    }
    assert_eq!(seen, submitted);
    assert_eq!(pool.live_workers(), 0);

    let stats = pool.stats().snapshot();
    assert!(stats.peak_in_flight <= 4);
    assert_eq!(stats.abandoned, 0);
}

#[tokio::test]
async fn close_with_timeout_escalates_to_cancel() {
    let pool = WorkerPool::new(1, 8, |_ctx: JobContext, n: u32| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, JobError>(n)
    });
    let results = pool.results().unwrap();
    pool.start().unwrap();

    for n in 0..4 {
        pool.submit(n).await.unwrap();
    }
    // Let the worker pick up the first job
    while pool.stats().started() == 0 {
        tokio::task::yield_now().await;
    }

    let err = pool
        .close_with_timeout(Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerPoolError::ShutdownTimeout { abandoned: 3 }));

    assert_eq!(pool.live_workers(), 0);
    assert_eq!(pool.status(), WorkerPoolStatus::Terminated);
    assert_eq!(ResultAggregator::new(results).collect().await.len(), 1);
}

#[tokio::test]
async fn shutdown_within_timeout_is_graceful() {
    let config = WorkerPoolConfig::new(2, 4).with_shutdown_timeout(Duration::from_secs(5));
    let pool = WorkerPool::with_config(config, |_ctx: JobContext, n: u32| async move {
        Ok::<_, JobError>(n)
    })
    .unwrap();
    let results = pool.results().unwrap();
    pool.start().unwrap();

    for n in 0..4 {
        pool.submit(n).await.unwrap();
    }
    pool.shutdown().await.unwrap();

    assert_eq!(ResultAggregator::new(results).summary().await.succeeded, 4);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_admission_spaces_submissions() {
    let config = WorkerPoolConfig::new(2, 16).with_rate_limit(RateLimitConfig::FixedInterval {
        interval: Duration::from_millis(100),
    });
    let pool = WorkerPool::with_config(config, |_ctx: JobContext, n: u32| async move {
        Ok::<_, JobError>(n)
    })
    .unwrap();
    pool.start().unwrap();

    let started = Instant::now();
    let mut admitted = Vec::new();
    for n in 0..5 {
        pool.submit(n).await.unwrap();
        admitted.push(started.elapsed());
    }

    for pair in admitted.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }
    assert!(matches!(pool.try_submit(5), Err(WorkerPoolError::RateLimited)));

    pool.close().await.unwrap();
}

#[tokio::test]
async fn bounded_results_throttle_workers() {
    let config = WorkerPoolConfig::new(1, 8).with_result_capacity(1);
    let pool = WorkerPool::with_config(config, |_ctx: JobContext, n: u32| async move {
        Ok::<_, JobError>(n)
    })
    .unwrap();
    let results = pool.results().unwrap();
    pool.start().unwrap();

    for n in 0..4 {
        pool.submit(n).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // One result buffered, one worker blocked emitting the next
    assert_eq!(pool.stats().started(), 2);
    assert_eq!(results.len(), 1);

    let drain = tokio::spawn(ResultAggregator::new(results).collect());
    pool.close().await.unwrap();
    assert_eq!(drain.await.unwrap().len(), 4);
}

#[tokio::test]
async fn strict_hand_off_pool_processes_everything() {
    let processed = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(2, 0, {
        let processed = Arc::clone(&processed);
        move |_ctx: JobContext, _n: u32| {
            let processed = Arc::clone(&processed);
            async move {
                processed.fetch_add(1, Ordering::SeqCst);
                Ok::<_, JobError>(())
            }
        }
    });
    pool.start().unwrap();

    for n in 0..20 {
        pool.submit(n).await.unwrap();
    }
    pool.close().await.unwrap();
    assert_eq!(processed.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn failed_jobs_are_resubmitted_by_the_caller() {
    // Each payload fails on its first attempt
    let attempts: Arc<Mutex<HashMap<u32, u32>>> = Arc::default();
    let pool = WorkerPool::new(2, 8, {
        let attempts = Arc::clone(&attempts);
        move |_ctx: JobContext, n: u32| {
            let attempts = Arc::clone(&attempts);
            async move {
                let attempt = {
                    let mut attempts = attempts.lock();
                    let entry = attempts.entry(n).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if attempt == 1 {
                    Err(JobError::failed(format!("transient failure for {n}")))
                } else {
                    Ok(n)
                }
            }
        }
    });
    let results = pool.results().unwrap();
    pool.start().unwrap();

    let policy = RetryPolicy::fixed(Duration::from_millis(1), 3);
    let mut outstanding: HashMap<JobId, (u32, u32)> = HashMap::new();
    for n in 0..5 {
        outstanding.insert(pool.submit(n).await.unwrap(), (n, 1));
    }

    let mut succeeded = Vec::new();
    while !outstanding.is_empty() {
        let result = results.recv().await.unwrap();
        let (payload, attempts_made) = outstanding.remove(&result.job_id).unwrap();
        match result.into_outcome() {
            Ok(n) => succeeded.push(n),
            Err(error) => {
                let delay = policy.next_delay(&error, attempts_made).unwrap();
                tokio::time::sleep(delay).await;
                let retry = pool.submit(payload).await.unwrap();
                outstanding.insert(retry, (payload, attempts_made + 1));
            }
        }
    }
    pool.close().await.unwrap();

    succeeded.sort();
    assert_eq!(succeeded, vec![0, 1, 2, 3, 4]);
    assert_eq!(pool.stats().snapshot().failed, 5);
}

#[tokio::test]
async fn close_with_timeout_unblocks_workers_on_a_full_result_stream() {
    let config = WorkerPoolConfig::new(1, 8).with_result_capacity(1);
    let pool = WorkerPool::with_config(config, |_ctx: JobContext, n: u32| async move {
        Ok::<_, JobError>(n)
    })
    .unwrap();
    // Taken but never drained
    let results = pool.results().unwrap();
    pool.start().unwrap();

    for n in 0..4 {
        pool.submit(n).await.unwrap();
    }

    let closed = tokio::time::timeout(
        Duration::from_secs(2),
        pool.close_with_timeout(Duration::from_millis(50)),
    )
    .await
    .expect("bounded close must return");
    assert!(matches!(closed, Err(WorkerPoolError::ShutdownTimeout { .. })));
    assert_eq!(pool.live_workers(), 0);

    let stats = pool.stats().snapshot();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.abandoned, 2);
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn cancel_then_close_returns_when_results_were_never_taken() {
    let config = WorkerPoolConfig::new(2, 8).with_result_capacity(1);
    let pool = WorkerPool::with_config(config, |_ctx: JobContext, n: u32| async move {
        Ok::<_, JobError>(n)
    })
    .unwrap();
    pool.start().unwrap();

    for n in 0..6 {
        pool.submit(n).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.cancel();
    tokio::time::timeout(Duration::from_secs(2), pool.close())
        .await
        .expect("close after cancel must return")
        .unwrap();

    assert_eq!(pool.live_workers(), 0);
    assert_eq!(pool.status(), WorkerPoolStatus::Terminated);
    assert!(matches!(pool.results(), Err(WorkerPoolError::Closed)));
}

#[tokio::test]
async fn graceful_close_with_untaken_bounded_results_completes() {
    let config = WorkerPoolConfig::new(2, 8).with_result_capacity(1);
    let pool = WorkerPool::with_config(config, |_ctx: JobContext, n: u32| async move {
        Ok::<_, JobError>(n)
    })
    .unwrap();
    pool.start().unwrap();

    for n in 0..6 {
        pool.submit(n).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(2), pool.close())
        .await
        .expect("close must return")
        .unwrap();

    assert_eq!(pool.stats().completed(), 6);
    assert_eq!(pool.live_workers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn snapshots_never_show_more_started_than_submitted() {
    let pool = Arc::new(WorkerPool::new(4, 4, |_ctx: JobContext, n: u32| async move {
        Ok::<_, JobError>(n)
    }));
    pool.start().unwrap();

    let sampler = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            while pool.status() == WorkerPoolStatus::Running {
                let stats = pool.stats().snapshot();
                assert!(
                    stats.started <= stats.submitted,
                    "started {} > submitted {}",
                    stats.started,
                    stats.submitted
                );
                tokio::task::yield_now().await;
            }
        })
    };

    for n in 0..500 {
        pool.submit(n).await.unwrap();
    }
    pool.close().await.unwrap();
    sampler.await.unwrap();

    let stats = pool.stats().snapshot();
    assert_eq!(stats.submitted, 500);
    assert_eq!(stats.started, 500);
}
