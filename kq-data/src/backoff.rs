use rand::Rng;
use std::time::{Duration, Instant};

/// Exponential reconnect backoff with a bounded attempt window (spec.md
/// §4.C: initial 1 s, multiplier 2, cap 60 s, max 5 attempts within a
/// 10-minute window, then surface `adapter_failed`). Mirrors the
/// reset/multiply state machine shape an adapter's reconnect loop uses,
/// generalized with the attempt-window ceiling the spec adds on top.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    multiplier: u32,
    cap: Duration,
    max_attempts: u32,
    window: Duration,
    current: Duration,
    attempts_in_window: u32,
    window_started_at: Option<Instant>,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, multiplier: u32, cap: Duration, max_attempts: u32, window: Duration) -> Self {
        Self {
            initial,
            multiplier,
            cap,
            max_attempts,
            window,
            current: initial,
            attempts_in_window: 0,
            window_started_at: None,
        }
    }

    /// Defaults from spec.md §4.C: 1 s → ×2 → cap 60 s, 5 attempts / 10 min.
    pub fn with_defaults() -> Self {
        Self::new(
            Duration::from_secs(1),
            2,
            Duration::from_secs(60),
            5,
            Duration::from_secs(600),
        )
    }

    /// Records a failed attempt and returns the sleep duration to wait
    /// before retrying, or `None` once `max_attempts` is exhausted inside
    /// the rolling `window` — the caller must then surface
    /// `adapter_failed` instead of retrying again.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let now = Instant::now();
        match self.window_started_at {
            Some(started) if now.duration_since(started) > self.window => {
                self.window_started_at = Some(now);
                self.attempts_in_window = 0;
                self.current = self.initial;
            }
            None => {
                self.window_started_at = Some(now);
            }
            _ => {}
        }

        self.attempts_in_window += 1;
        if self.attempts_in_window > self.max_attempts {
            return None;
        }

        let jitter = rand::thread_rng().gen_range(0..=self.current.as_millis() as u64 / 10 + 1);
        let delay = self.current + Duration::from_millis(jitter);

        let next = self.current * self.multiplier;
        self.current = next.min(self.cap);

        Some(delay)
    }

    /// Resets the backoff on a successful reconnect.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts_in_window = 0;
        self.window_started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_secs(1),
            2,
            Duration::from_secs(8),
            10,
            Duration::from_secs(600),
        );
        let d1 = backoff.next_delay().unwrap();
        let d2 = backoff.next_delay().unwrap();
        let d3 = backoff.next_delay().unwrap();
        let d4 = backoff.next_delay().unwrap();
        assert!(d1 >= Duration::from_secs(1) && d1 < Duration::from_secs(2));
        assert!(d2 >= Duration::from_secs(2) && d2 < Duration::from_secs(3));
        assert!(d3 >= Duration::from_secs(4) && d3 < Duration::from_secs(5));
        // capped at 8s from here on
        assert!(d4 >= Duration::from_secs(8) && d4 < Duration::from_secs(9));
    }

    #[test]
    fn exhausting_max_attempts_surfaces_none() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(1),
            2,
            Duration::from_secs(1),
            3,
            Duration::from_secs(600),
        );
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_secs(1),
            2,
            Duration::from_secs(60),
            5,
            Duration::from_secs(600),
        );
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        let d = backoff.next_delay().unwrap();
        assert!(d >= Duration::from_secs(1) && d < Duration::from_secs(2));
    }
}
