//! Process-wide configuration (spec.md §6 "Configuration"). Loading a
//! config *file* (TOML/env layering, CLI flags) is an external
//! collaborator's job per spec.md §1's Non-goals; this module only
//! defines the recognized shape and a conservative default that the
//! composition root runs with as-is.

use kq_execution::ExecutionConfig;
use kq_instrument::{Interval, Symbol};
use kq_risk::RiskConfig;
use kq_ta::AnalyzerConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// Where this process gets its market data from (spec.md §4.C "Adapter
/// variants").
#[derive(Debug, Clone)]
pub enum AdapterConfig {
    Streaming { url: String },
    Polled { base_url: String, poll_interval_ms: u64 },
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig::Polled { base_url: "https://quote.invalid.example/krx".to_string(), poll_interval_ms: 1000 }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `symbols` (spec.md §6): symbols to track.
    pub symbols: Vec<Symbol>,
    /// `intervals` (spec.md §6): candle intervals to maintain.
    pub intervals: Vec<Interval>,
    /// `ring_size` (spec.md §6), default 200.
    pub ring_size: usize,
    /// `cache_memory_budget_mb` (spec.md §4.B), default 150.
    pub cache_memory_budget_mb: usize,
    /// `bus_subscriber_buffer` (spec.md §6), default 1024.
    pub bus_subscriber_buffer: usize,
    /// Starting cash, used to seed the risk engine's portfolio value
    /// until the first real balance query comes back from the broker
    /// (out of scope per spec.md §1).
    pub starting_cash: Decimal,
    /// Refuses to start if true (spec.md §6 "Error exit conditions":
    /// "non-zero on ... emergency-stop armed at startup").
    pub emergency_stop_armed_at_startup: bool,

    pub adapter: AdapterConfig,
    pub analyzer: AnalyzerConfig,
    pub quality: kq_data::QualityConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("symbols must not be empty")]
    NoSymbols,
    #[error("intervals must not be empty")]
    NoIntervals,
    #[error("ring_size must be > 0")]
    ZeroRingSize,
}

impl Config {
    /// spec.md §6 "Error exit conditions": "non-zero on configuration
    /// validation failure".
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if self.intervals.is_empty() {
            return Err(ConfigError::NoIntervals);
        }
        if self.ring_size == 0 {
            return Err(ConfigError::ZeroRingSize);
        }
        Ok(())
    }

    pub fn cache_memory_budget_bytes(&self) -> usize {
        self.cache_memory_budget_mb * 1024 * 1024
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec![Symbol::new("005930").expect("005930 is a valid 6-digit KRX code")],
            intervals: vec![Interval::M1, Interval::M5],
            ring_size: 200,
            cache_memory_budget_mb: 150,
            bus_subscriber_buffer: 1024,
            starting_cash: dec!(10_000_000),
            emergency_stop_armed_at_startup: false,
            adapter: AdapterConfig::default(),
            analyzer: AnalyzerConfig::default(),
            quality: kq_data::QualityConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl AdapterConfig {
    pub fn poll_interval(&self) -> Duration {
        match self {
            AdapterConfig::Polled { poll_interval_ms, .. } => Duration::from_millis(*poll_interval_ms),
            AdapterConfig::Streaming { .. } => Duration::ZERO,
        }
    }
}
