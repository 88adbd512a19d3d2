use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sheetops::OpsError;
use sheetops::rate_limit::{BucketConfig, OperationClass, RateLimitConfig, RateLimiter};

fn limiter(capacity: u32, refill_per_sec: f64) -> RateLimiter {
    let bucket = BucketConfig {
        capacity,
        refill_per_sec,
    };
    RateLimiter::new(RateLimitConfig {
        read: bucket,
        write: bucket,
        throttle_cooldown: Duration::from_secs(60),
    })
}

#[tokio::test(start_paused = true)]
async fn tokens_never_exceed_capacity() {
    let limiter = limiter(5, 1.0);
    limiter.acquire(OperationClass::Write, 5).await.unwrap();
    assert!(!limiter.try_acquire(OperationClass::Write, 1));

    tokio::time::advance(Duration::from_secs(100)).await;
    let snapshot = limiter.snapshot(OperationClass::Write);
    assert_eq!(snapshot.tokens, 5.0);
    assert_eq!(snapshot.capacity, 5);
    assert!(limiter.try_acquire(OperationClass::Write, 5));
    assert!(!limiter.try_acquire(OperationClass::Write, 1));
}

#[tokio::test(start_paused = true)]
async fn acquire_waits_for_the_deficit() {
    let limiter = limiter(2, 1.0);
    limiter.acquire(OperationClass::Read, 2).await.unwrap();

    let started = Instant::now();
    limiter.acquire(OperationClass::Read, 2).await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(1990), "waited {waited:?}");
    assert!(waited < Duration::from_millis(2500), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn classes_have_independent_budgets() {
    let limiter = limiter(3, 1.0);
    limiter.acquire(OperationClass::Write, 3).await.unwrap();
    assert!(!limiter.try_acquire(OperationClass::Write, 1));
    assert!(limiter.try_acquire(OperationClass::Read, 3));
}

#[tokio::test(start_paused = true)]
async fn throttle_halves_refill_until_cooldown_ends() {
    let limiter = limiter(10, 2.0);

    let hint = limiter.report_throttle(OperationClass::Write);
    assert_eq!(hint, 0, "a full bucket needs no wait");
    let snapshot = limiter.snapshot(OperationClass::Write);
    assert_eq!(snapshot.refill_per_sec, 1.0);
    assert_eq!(snapshot.nominal_refill_per_sec, 2.0);
    assert!(snapshot.cooling_down);

    limiter.report_throttle(OperationClass::Write);
    limiter.report_throttle(OperationClass::Write);
    limiter.report_throttle(OperationClass::Write);
    assert_eq!(
        limiter.snapshot(OperationClass::Write).refill_per_sec,
        0.25,
        "refill never drops below an eighth of nominal"
    );
    assert_eq!(limiter.snapshot(OperationClass::Read).refill_per_sec, 2.0);

    tokio::time::advance(Duration::from_secs(61)).await;
    let snapshot = limiter.snapshot(OperationClass::Write);
    assert_eq!(snapshot.refill_per_sec, 2.0);
    assert!(!snapshot.cooling_down);
}

#[tokio::test(start_paused = true)]
async fn throttle_hint_reflects_reduced_rate() {
    let limiter = limiter(4, 1.0);
    limiter.acquire(OperationClass::Write, 4).await.unwrap();
    let hint = limiter.report_throttle(OperationClass::Write);
    // One token at half a token per second.
    assert_eq!(hint, 2000);
}

#[tokio::test(start_paused = true)]
async fn waiters_are_served_in_arrival_order() {
    let limiter = Arc::new(limiter(4, 1.0));
    limiter.acquire(OperationClass::Write, 4).await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let big = {
        let limiter = limiter.clone();
        let order = order.clone();
        tokio::spawn(async move {
            limiter.acquire(OperationClass::Write, 3).await.unwrap();
            order.lock().push("big");
        })
    };
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    let small = {
        let limiter = limiter.clone();
        let order = order.clone();
        tokio::spawn(async move {
            limiter.acquire(OperationClass::Write, 1).await.unwrap();
            order.lock().push("small");
        })
    };

    big.await.unwrap();
    small.await.unwrap();
    assert_eq!(*order.lock(), vec!["big", "small"]);
}

#[tokio::test(start_paused = true)]
async fn oversized_request_is_rejected() {
    let limiter = limiter(5, 1.0);
    let err = limiter.acquire(OperationClass::Read, 6).await.unwrap_err();
    assert_matches!(err, OpsError::Validation { .. });
    assert!(!limiter.try_acquire(OperationClass::Read, 6));
}

#[tokio::test(start_paused = true)]
async fn cancelled_wait_debits_nothing() {
    let limiter = limiter(2, 0.1);
    limiter.acquire(OperationClass::Write, 2).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = limiter
        .acquire_with_cancel(OperationClass::Write, 1, &cancel)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        OpsError::Cancelled {
            dispatched: false,
            ..
        }
    );

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(limiter.try_acquire(OperationClass::Write, 1));
}
