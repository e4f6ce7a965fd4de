//! Outbound broker rate limiting (spec.md §4.H.3, §6 `broker_rate_limit_rps`
//! default 18). Reused as-is from the teacher's
//! `jackbot-integration::rate_limit::RateLimiter` token bucket — the
//! mechanism is identical, only the default capacity/interval differ.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

/// Default outbound cap (spec.md §6 `broker_rate_limit_rps`).
pub const DEFAULT_RATE_LIMIT_RPS: usize = 18;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Priority {
    High,
    Normal,
    Low,
}

struct Waiter {
    tx: oneshot::Sender<()>,
}

struct Inner {
    capacity: usize,
    tokens: usize,
    interval: Duration,
    last_refill: Instant,
    base_interval: Duration,
    max_interval: Duration,
    high: VecDeque<Waiter>,
    normal: VecDeque<Waiter>,
    low: VecDeque<Waiter>,
}

impl Inner {
    fn refill(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_refill) >= self.interval {
            let periods = now.duration_since(self.last_refill).as_millis() / self.interval.as_millis().max(1);
            let add_tokens = (periods as usize + 1) * self.capacity;
            self.last_refill = now;
            self.tokens = usize::min(self.tokens + add_tokens, self.capacity);
            while self.tokens > 0 {
                if let Some(waiter) = self.high.pop_front().or_else(|| self.normal.pop_front()).or_else(|| self.low.pop_front()) {
                    self.tokens -= 1;
                    let _ = waiter.tx.send(());
                } else {
                    break;
                }
            }
            if self.tokens > self.capacity {
                self.tokens = self.capacity;
            }
        }
    }
}

/// Token-bucket rate limiter with priority queues and adaptive backoff,
/// bounding the order engine's outbound calls to the broker.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Inner>>,
}

impl RateLimiter {
    /// Allows `capacity` operations every `interval`.
    pub fn new(capacity: usize, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                tokens: capacity,
                interval,
                last_refill: Instant::now(),
                base_interval: interval,
                max_interval: interval * 16,
                high: VecDeque::new(),
                normal: VecDeque::new(),
                low: VecDeque::new(),
            })),
        }
    }

    /// `broker_rate_limit_rps` requests per second, one-second windows.
    pub fn per_second(rps: usize) -> Self {
        Self::new(rps, Duration::from_secs(1))
    }

    pub async fn acquire(&self, priority: Priority) {
        loop {
            let rx = {
                let mut inner = self.inner.lock().await;
                inner.refill();
                if inner.tokens > 0 {
                    inner.tokens -= 1;
                    None
                } else {
                    let (tx, rx) = oneshot::channel();
                    let waiter = Waiter { tx };
                    match priority {
                        Priority::High => inner.high.push_back(waiter),
                        Priority::Normal => inner.normal.push_back(waiter),
                        Priority::Low => inner.low.push_back(waiter),
                    }
                    Some(rx)
                }
            };
            match rx {
                None => return,
                Some(rx) => {
                    let _ = rx.await;
                }
            }
        }
    }

    /// Triggered on a broker-reported rate-limit rejection (spec.md
    /// §4.H.3): doubles the refill interval up to 16x the base.
    pub async fn report_violation(&self) {
        let mut inner = self.inner.lock().await;
        let next = inner.interval * 2;
        inner.interval = std::cmp::min(next, inner.max_interval);
    }

    pub async fn reset_backoff(&self) {
        let mut inner = self.inner.lock().await;
        inner.interval = inner.base_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration, Instant};

    #[tokio::test]
    async fn a_second_burst_beyond_capacity_waits_for_refill() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        limiter.acquire(Priority::Normal).await;
        limiter.acquire(Priority::Normal).await;
        let start = Instant::now();
        limiter.acquire(Priority::Normal).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn high_priority_waiters_are_served_before_low_priority_ones() {
        let limiter = RateLimiter::new(1, Duration::from_millis(40));
        limiter.acquire(Priority::Normal).await;
        let low = limiter.clone();
        let low_task = tokio::spawn(async move {
            low.acquire(Priority::Low).await;
            Instant::now()
        });
        sleep(Duration::from_millis(10)).await;
        let high = limiter.clone();
        let high_task = tokio::spawn(async move {
            high.acquire(Priority::High).await;
            Instant::now()
        });
        let high_time = high_task.await.unwrap();
        let low_time = low_task.await.unwrap();
        assert!(high_time <= low_time);
    }

    #[tokio::test]
    async fn reporting_a_violation_doubles_the_wait() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        limiter.acquire(Priority::Normal).await;
        limiter.report_violation().await;
        let start = Instant::now();
        limiter.acquire(Priority::Normal).await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
