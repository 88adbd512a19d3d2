//! Token buckets gating provider calls, one per operation class.
//!
//! Waiters queue on a fair async mutex, so acquisition is FIFO per class and a
//! large request cannot be starved by a stream of small ones. Waiting suspends
//! the task; no thread is parked.

use crate::errors::{OpsError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationClass {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            refill_per_sec: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub read: BucketConfig,
    pub write: BucketConfig,
    /// How long a throttled class keeps its reduced refill rate.
    pub throttle_cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read: BucketConfig::default(),
            write: BucketConfig::default(),
            throttle_cooldown: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of one bucket, for status output and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetSnapshot {
    pub class: OperationClass,
    pub tokens: f64,
    pub capacity: u32,
    pub refill_per_sec: f64,
    pub nominal_refill_per_sec: f64,
    pub cooling_down: bool,
}

struct BucketState {
    tokens: f64,
    rate: f64,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
}

struct TokenBucket {
    class: OperationClass,
    capacity: f64,
    nominal_rate: f64,
    state: Mutex<BucketState>,
    queue: tokio::sync::Mutex<()>,
}

impl TokenBucket {
    fn new(class: OperationClass, config: BucketConfig) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        let nominal_rate = if config.refill_per_sec > 0.0 {
            config.refill_per_sec
        } else {
            1.0
        };
        Self {
            class,
            capacity,
            nominal_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                rate: nominal_rate,
                last_refill: Instant::now(),
                cooldown_until: None,
            }),
            queue: tokio::sync::Mutex::new(()),
        }
    }

    /// Credit tokens earned since the last refill. The reduced rate applies
    /// only up to the end of the cooldown; nominal rate after it.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        if now <= state.last_refill {
            return;
        }
        match state.cooldown_until {
            Some(until) if until <= now => {
                let reduced = until.saturating_duration_since(state.last_refill);
                let restored = now.saturating_duration_since(until);
                state.tokens +=
                    reduced.as_secs_f64() * state.rate + restored.as_secs_f64() * self.nominal_rate;
                state.rate = self.nominal_rate;
                state.cooldown_until = None;
                debug!(class = %self.class, "throttle cooldown elapsed; refill rate restored");
            }
            _ => {
                let elapsed = now.saturating_duration_since(state.last_refill);
                state.tokens += elapsed.as_secs_f64() * state.rate;
            }
        }
        state.tokens = state.tokens.min(self.capacity);
        state.last_refill = now;
    }

    /// Debit `n` tokens if available, else report how long to wait.
    fn try_take(&self, n: f64) -> std::result::Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.refill(&mut state, now);
        if state.tokens >= n {
            state.tokens -= n;
            return Ok(());
        }
        let deficit = n - state.tokens;
        let mut wait = Duration::from_secs_f64(deficit / state.rate);
        // Re-check at the end of a cooldown since the rate goes back up there.
        if let Some(until) = state.cooldown_until {
            let to_restore = until.saturating_duration_since(now);
            if !to_restore.is_zero() && to_restore < wait {
                wait = to_restore;
            }
        }
        Err(wait.max(Duration::from_millis(1)))
    }

    async fn acquire(&self, n: u32) -> Result<()> {
        let n = f64::from(n);
        if n > self.capacity {
            return Err(OpsError::validation(format!(
                "cannot acquire {n} {} tokens from a bucket of capacity {}",
                self.class, self.capacity
            )));
        }
        let _turn = self.queue.lock().await;
        loop {
            match self.try_take(n) {
                Ok(()) => return Ok(()),
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    fn report_throttle(&self, cooldown: Duration) -> u64 {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.refill(&mut state, now);
        state.rate = (state.rate / 2.0).max(self.nominal_rate / 8.0);
        let until = now + cooldown;
        state.cooldown_until = Some(match state.cooldown_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        warn!(
            class = %self.class,
            refill_per_sec = state.rate,
            cooldown_ms = cooldown.as_millis() as u64,
            "provider throttled; slowing refill"
        );
        let deficit = (1.0 - state.tokens).max(0.0);
        ((deficit / state.rate) * 1000.0).ceil() as u64
    }

    fn snapshot(&self) -> BudgetSnapshot {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        BudgetSnapshot {
            class: self.class,
            tokens: state.tokens,
            capacity: self.capacity as u32,
            refill_per_sec: state.rate,
            nominal_refill_per_sec: self.nominal_rate,
            cooling_down: state.cooldown_until.is_some(),
        }
    }
}

/// Process-wide quota gate. Construct one and share it; tests build their own.
pub struct RateLimiter {
    read: TokenBucket,
    write: TokenBucket,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            read: TokenBucket::new(OperationClass::Read, config.read),
            write: TokenBucket::new(OperationClass::Write, config.write),
            cooldown: config.throttle_cooldown,
        }
    }

    fn bucket(&self, class: OperationClass) -> &TokenBucket {
        match class {
            OperationClass::Read => &self.read,
            OperationClass::Write => &self.write,
        }
    }

    /// Wait until `n` tokens are available, then debit them.
    pub async fn acquire(&self, class: OperationClass, n: u32) -> Result<()> {
        self.bucket(class).acquire(n).await
    }

    /// As [`acquire`](Self::acquire), unwinding without a debit on cancellation.
    pub async fn acquire_with_cancel(
        &self,
        class: OperationClass,
        n: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OpsError::Cancelled {
                operation: "rate limit acquire",
                dispatched: false,
            }),
            acquired = self.acquire(class, n) => acquired,
        }
    }

    /// Non-waiting variant; false when the tokens are not there right now.
    pub fn try_acquire(&self, class: OperationClass, n: u32) -> bool {
        let bucket = self.bucket(class);
        if f64::from(n) > bucket.capacity {
            return false;
        }
        match bucket.queue.try_lock() {
            Ok(_turn) => bucket.try_take(f64::from(n)).is_ok(),
            Err(_) => false,
        }
    }

    /// Record a provider throttling signal. Returns a retry hint in milliseconds.
    pub fn report_throttle(&self, class: OperationClass) -> u64 {
        self.bucket(class).report_throttle(self.cooldown)
    }

    pub fn snapshot(&self, class: OperationClass) -> BudgetSnapshot {
        self.bucket(class).snapshot()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
