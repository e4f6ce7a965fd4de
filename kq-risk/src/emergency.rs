//! Emergency stop (spec.md §4.G.2): a system-wide armed flag that the
//! synchronous rule chain's `EmergencyStop` rule reads on every check.
//! Grounded on `jackbot-risk/src/alert.rs`'s `RiskViolation`/`RiskAlertHook`
//! pattern, generalized from "notify a hook" to "flip a shared flag the
//! rule chain consults".

use crate::config::EmergencyStopConfig;
use crate::error::RiskError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Window over which `note_error`'s rolling count is measured (spec.md
/// §4.G.2 "unusually high error rate"; `max_error_rate_per_min` is a
/// per-minute budget).
const ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);

/// One of the arm conditions spec.md §4.G.2 lists.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ArmTrigger {
    DailyLossLimitExceeded,
    ConsecutiveLosses,
    UpstreamApiDown,
    PositionValuationStale,
    ErrorRateHigh,
    Manual,
}

impl ArmTrigger {
    fn reason(self) -> &'static str {
        match self {
            ArmTrigger::DailyLossLimitExceeded => "daily_loss_limit_exceeded",
            ArmTrigger::ConsecutiveLosses => "consecutive_losses",
            ArmTrigger::UpstreamApiDown => "upstream_api_down",
            ArmTrigger::PositionValuationStale => "position_valuation_stale",
            ArmTrigger::ErrorRateHigh => "error_rate_high",
            ArmTrigger::Manual => "manual_trigger",
        }
    }
}

pub struct EmergencyStop {
    armed: AtomicBool,
    reason: Mutex<String>,
    config: EmergencyStopConfig,
    last_upstream_heartbeat: Mutex<Instant>,
    last_position_valuation: Mutex<Instant>,
    recent_errors: Mutex<VecDeque<Instant>>,
}

impl EmergencyStop {
    pub fn new(config: EmergencyStopConfig) -> Self {
        let now = Instant::now();
        Self {
            armed: AtomicBool::new(false),
            reason: Mutex::new(String::new()),
            config,
            last_upstream_heartbeat: Mutex::new(now),
            last_position_valuation: Mutex::new(now),
            recent_errors: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> String {
        self.reason.lock().clone()
    }

    /// Arms the stop. Returns `true` if this call transitioned it from
    /// disarmed to armed (so the caller publishes `emergency_stop` only
    /// once).
    pub fn arm(&self, trigger: ArmTrigger) -> bool {
        let was_armed = self.armed.swap(true, Ordering::AcqRel);
        *self.reason.lock() = trigger.reason().to_string();
        !was_armed
    }

    /// Disarm requires an authenticated token distinct from normal
    /// config (spec.md §4.G.2).
    pub fn disarm(&self, token: &str) -> Result<(), RiskError> {
        if token != self.config.disarm_token {
            return Err(RiskError::InvalidDisarmToken);
        }
        self.armed.store(false, Ordering::Release);
        self.reason.lock().clear();
        Ok(())
    }

    pub fn note_upstream_heartbeat(&self) {
        *self.last_upstream_heartbeat.lock() = Instant::now();
    }

    pub fn note_position_valuation(&self) {
        *self.last_position_valuation.lock() = Instant::now();
    }

    /// Records one observed error (e.g. an `order_failed` event) and arms
    /// `ArmTrigger::ErrorRateHigh` once the rolling count within
    /// [`ERROR_RATE_WINDOW`] crosses `max_error_rate_per_min` (spec.md
    /// §4.G.2 "unusually high error rate").
    pub fn note_error(&self) {
        let now = Instant::now();
        let mut recent = self.recent_errors.lock();
        recent.push_back(now);
        while recent.front().is_some_and(|t| now.duration_since(*t) > ERROR_RATE_WINDOW) {
            recent.pop_front();
        }
        if recent.len() as u32 > self.config.max_error_rate_per_min {
            drop(recent);
            self.arm(ArmTrigger::ErrorRateHigh);
        }
    }

    /// Checks the time-based arm conditions (upstream staleness, position
    /// valuation staleness). Counters (consecutive losses, daily loss,
    /// error rate) are evaluated by the caller against its own state and
    /// armed via [`Self::arm`] (or, for the error rate, [`Self::note_error`])
    /// directly.
    pub fn check_staleness(&self) {
        if self.last_upstream_heartbeat.lock().elapsed().as_secs() > self.config.upstream_down_secs {
            self.arm(ArmTrigger::UpstreamApiDown);
        }
        if self.last_position_valuation.lock().elapsed().as_secs() > self.config.position_stale_secs {
            self.arm(ArmTrigger::PositionValuationStale);
        }
    }
}
