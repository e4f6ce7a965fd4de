use crate::commission::CommissionConfig;
use kq_instrument::StrategyId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;

/// Order Engine tunables (spec.md §4.H.2–§4.H.4, §6 config table).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExecutionConfig {
    pub max_concurrent_submissions: usize,
    pub priority_timeout_secs: u64,
    pub max_partial_fill_time_secs: u64,
    pub max_fills_per_order: usize,
    pub broker_rate_limit_rps: usize,

    /// Fallback "configured lot sizing" (spec.md §4.H.1 step 1) used for
    /// every non-exit signal; strategies wanting a risk-scaled size call
    /// `kq_risk::PositionSizeRecommender` themselves and carry the result
    /// in the signal's `suggested_price`/reason rather than the order
    /// engine re-deriving it from a bare `TradingSignal`.
    pub default_lot_size: Decimal,

    pub broker_max_retries: u32,
    pub broker_retry_base_delay_ms: u64,

    /// `±10` priority adjustment per strategy (spec.md §4.H.2).
    #[serde(default)]
    pub strategy_priority_overrides: HashMap<StrategyId, i32>,

    pub commission: CommissionConfig,
}

impl ExecutionConfig {
    pub fn priority_timeout(&self) -> Duration {
        Duration::from_secs(self.priority_timeout_secs)
    }

    pub fn max_partial_fill_time(&self) -> Duration {
        Duration::from_secs(self.max_partial_fill_time_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_submissions: crate::queue::DEFAULT_MAX_CONCURRENT_SUBMISSIONS,
            priority_timeout_secs: crate::queue::DEFAULT_PRIORITY_TIMEOUT.as_secs(),
            max_partial_fill_time_secs: crate::tracker::DEFAULT_MAX_PARTIAL_FILL_TIME.as_secs(),
            max_fills_per_order: crate::tracker::DEFAULT_MAX_FILLS_PER_ORDER,
            broker_rate_limit_rps: crate::rate_limit::DEFAULT_RATE_LIMIT_RPS,
            default_lot_size: dec!(10),
            broker_max_retries: 3,
            broker_retry_base_delay_ms: 200,
            strategy_priority_overrides: HashMap::new(),
            commission: CommissionConfig::default(),
        }
    }
}
