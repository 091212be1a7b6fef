use crate::config::Settings;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-caller token bucket gating the summarize → analysis path.
///
/// Refill is computed lazily from elapsed time on each check; no timer is
/// needed for correctness. [`CallGovernor::sweep_idle`] only bounds memory.
#[derive(Debug)]
pub struct CallGovernor {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl CallGovernor {
    pub fn new(capacity: u32, refill_per_minute: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec: refill_per_minute.max(0.0) / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.rate_limit_capacity,
            settings.rate_limit_refill_per_minute,
        )
    }

    /// Consumes one token for `caller_id`; `false` means the call is not admitted.
    pub fn check_limit(&self, caller_id: &str) -> bool {
        self.check_limit_at(caller_id, Instant::now())
    }

    pub fn check_limit_at(&self, caller_id: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(caller_id.to_string())
            .or_insert(Bucket {
                tokens: self.capacity,
                last_refill: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            tracing::debug!(caller = caller_id, tokens = bucket.tokens, "call rejected by governor");
            false
        }
    }

    /// Evicts callers idle for at least `max_idle` (never less than the time a
    /// drained bucket needs to refill, so eviction cannot grant extra tokens).
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        self.sweep_idle_at(max_idle, Instant::now())
    }

    pub fn sweep_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let max_idle = max_idle.max(self.time_to_full());
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) < max_idle);
        let evicted = before - buckets.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = buckets.len(), "governor idle sweep");
        }
        evicted
    }

    pub fn tracked_callers(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs [`Self::sweep_idle`] every `every` until the runtime shuts down.
    pub fn spawn_idle_sweep(
        self: &Arc<Self>,
        every: Duration,
        max_idle: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                governor.sweep_idle(max_idle);
            }
        })
    }

    fn time_to_full(&self) -> Duration {
        if self.refill_per_sec <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64(self.capacity / self.refill_per_sec).unwrap_or(Duration::MAX)
    }
}
