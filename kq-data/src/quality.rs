use crate::tick::MarketTick;
use dashmap::DashMap;
use kq_instrument::Symbol;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;

/// Severity a gate attaches to a non-pass outcome (spec.md §4.D).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GateSeverity {
    Critical,
    High,
}

/// Result of running one tick through the gate chain.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Pass,
    /// The tick is discarded; candle construction either halts (critical)
    /// or continues without it (high).
    Drop { gate: &'static str, severity: GateSeverity, reason: String },
    /// The tick is kept but the violation is logged and, for quality
    /// purposes, surfaced as a `quality_issue`.
    Warn { gate: &'static str, severity: GateSeverity, reason: String },
}

#[derive(Debug, Clone)]
pub struct QualityConfig {
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub staleness_threshold: chrono::Duration,
    pub outlier_z_threshold: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_price: Decimal::new(1, 0),
            max_price: Decimal::new(10_000_000, 0),
            staleness_threshold: chrono::Duration::minutes(5),
            outlier_z_threshold: 8.0,
        }
    }
}

const OUTLIER_WINDOW: usize = 20;

/// Ordered quality-gate chain (spec.md §4.D). Stateful per symbol: the
/// duplicate gate needs the previous tick and the outlier gate needs a
/// rolling window of the last 20 closes. State here is deliberately
/// separate from [`kq_cache`] — raw ticks are not part of the KV cache's
/// persisted keyspaces (spec.md §3: `MarketTick` is "not persisted in the
/// core").
pub struct QualityGateChain {
    config: QualityConfig,
    last_tick: DashMap<Symbol, MarketTick>,
    recent_closes: DashMap<Symbol, VecDeque<Decimal>>,
    recent_volumes: DashMap<Symbol, VecDeque<Decimal>>,
}

impl QualityGateChain {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            last_tick: DashMap::new(),
            recent_closes: DashMap::new(),
            recent_volumes: DashMap::new(),
        }
    }

    /// Runs `tick` through every gate in spec order; the first failure
    /// determines the outcome. A `Pass` (or `Warn`, which still counts as
    /// "kept") updates this chain's rolling state.
    pub fn evaluate(&self, tick: &MarketTick, now: chrono::DateTime<chrono::Utc>) -> GateOutcome {
        if let outcome @ (GateOutcome::Drop { .. }) = self.check_required_fields(tick) {
            return outcome;
        }
        if let outcome @ (GateOutcome::Drop { .. }) = self.check_types_and_ranges(tick) {
            return outcome;
        }
        if let outcome @ (GateOutcome::Drop { .. }) = self.check_ohlc_consistency(tick) {
            return outcome;
        }
        let staleness = self.check_staleness(tick, now);
        if let GateOutcome::Drop { .. } = staleness {
            return staleness;
        }

        if let outcome @ (GateOutcome::Drop { .. }) = self.check_duplicate(tick) {
            return outcome;
        }

        let outlier = self.check_outlier(tick);
        let volume_outlier = self.check_volume_outlier(tick);

        self.last_tick.insert(tick.symbol.clone(), tick.clone());
        let mut window = self.recent_closes.entry(tick.symbol.clone()).or_default();
        window.push_back(tick.close);
        if window.len() > OUTLIER_WINDOW {
            window.pop_front();
        }
        drop(window);

        let mut volumes = self.recent_volumes.entry(tick.symbol.clone()).or_default();
        volumes.push_back(tick.volume);
        if volumes.len() > OUTLIER_WINDOW {
            volumes.pop_front();
        }
        drop(volumes);

        match (staleness, outlier, volume_outlier) {
            (warn @ GateOutcome::Warn { .. }, _, _) => warn,
            (_, warn @ GateOutcome::Warn { .. }, _) => warn,
            (_, _, warn @ GateOutcome::Warn { .. }) => warn,
            _ => GateOutcome::Pass,
        }
    }

    fn check_required_fields(&self, tick: &MarketTick) -> GateOutcome {
        // `Symbol`, `ts`, and `close` are non-optional in `MarketTick`'s
        // type, so absence is rejected by the adapter before a tick ever
        // reaches this chain (spec.md §4.C). This gate remains as the
        // chain's documented first link and catches adapters that smuggle
        // a sentinel timestamp through.
        if tick.ts == chrono::DateTime::<chrono::Utc>::UNIX_EPOCH {
            return GateOutcome::Drop {
                gate: "required_fields",
                severity: GateSeverity::Critical,
                reason: "timestamp is the zero sentinel".into(),
            };
        }
        GateOutcome::Pass
    }

    fn check_types_and_ranges(&self, tick: &MarketTick) -> GateOutcome {
        if tick.close <= Decimal::ZERO {
            return GateOutcome::Drop {
                gate: "types_and_ranges",
                severity: GateSeverity::Critical,
                reason: format!("close {} is not positive", tick.close),
            };
        }
        if tick.volume < Decimal::ZERO {
            return GateOutcome::Drop {
                gate: "types_and_ranges",
                severity: GateSeverity::Critical,
                reason: format!("volume {} is negative", tick.volume),
            };
        }
        if tick.close < self.config.min_price || tick.close > self.config.max_price {
            return GateOutcome::Drop {
                gate: "types_and_ranges",
                severity: GateSeverity::Critical,
                reason: format!(
                    "close {} outside [{}, {}]",
                    tick.close, self.config.min_price, self.config.max_price
                ),
            };
        }
        GateOutcome::Pass
    }

    fn check_ohlc_consistency(&self, tick: &MarketTick) -> GateOutcome {
        let (Some(open), Some(high), Some(low)) = (tick.open, tick.high, tick.low) else {
            return GateOutcome::Pass;
        };
        let expected_low = open.min(tick.close);
        let expected_high = open.max(tick.close);
        if low > expected_low || high < expected_high {
            return GateOutcome::Drop {
                gate: "ohlc_consistency",
                severity: GateSeverity::High,
                reason: format!(
                    "low {low}/high {high} inconsistent with open {open}/close {}",
                    tick.close
                ),
            };
        }
        GateOutcome::Pass
    }

    fn check_staleness(&self, tick: &MarketTick, now: chrono::DateTime<chrono::Utc>) -> GateOutcome {
        if now - tick.ts > self.config.staleness_threshold {
            return GateOutcome::Warn {
                gate: "staleness",
                severity: GateSeverity::High,
                reason: format!("tick is {} behind now", now - tick.ts),
            };
        }
        GateOutcome::Pass
    }

    fn check_duplicate(&self, tick: &MarketTick) -> GateOutcome {
        if let Some(last) = self.last_tick.get(&tick.symbol) {
            if last.ts == tick.ts && last.close == tick.close {
                return GateOutcome::Drop {
                    gate: "duplicate",
                    severity: GateSeverity::High,
                    reason: "identical (symbol, ts, close) as the head of the ring".into(),
                };
            }
        }
        GateOutcome::Pass
    }

    fn check_outlier(&self, tick: &MarketTick) -> GateOutcome {
        let Some(window) = self.recent_closes.get(&tick.symbol) else {
            return GateOutcome::Pass;
        };
        if window.len() < 2 {
            return GateOutcome::Pass;
        }
        let closes: Vec<f64> = window.iter().filter_map(|d| d.to_f64()).collect();
        let mean = closes.iter().sum::<f64>() / closes.len() as f64;
        let variance = closes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / closes.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return GateOutcome::Pass;
        }
        let Some(close) = tick.close.to_f64() else {
            return GateOutcome::Pass;
        };
        let z = (close - mean).abs() / std_dev;
        if z > self.config.outlier_z_threshold {
            return GateOutcome::Warn {
                gate: "outlier",
                severity: GateSeverity::High,
                reason: format!("z-score {z:.2} exceeds threshold {}", self.config.outlier_z_threshold),
            };
        }
        GateOutcome::Pass
    }

    /// Volume-side counterpart of [`Self::check_outlier`] (spec.md §4.D:
    /// "Volume outliers are warn-only"). Same z-score-vs-rolling-window
    /// shape as the price check, over `tick.volume` instead of close, and
    /// never escalates to a drop regardless of how extreme the z-score is.
    fn check_volume_outlier(&self, tick: &MarketTick) -> GateOutcome {
        let Some(window) = self.recent_volumes.get(&tick.symbol) else {
            return GateOutcome::Pass;
        };
        if window.len() < 2 {
            return GateOutcome::Pass;
        }
        let volumes: Vec<f64> = window.iter().filter_map(|d| d.to_f64()).collect();
        let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
        let variance = volumes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / volumes.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return GateOutcome::Pass;
        }
        let Some(volume) = tick.volume.to_f64() else {
            return GateOutcome::Pass;
        };
        let z = (volume - mean).abs() / std_dev;
        if z > self.config.outlier_z_threshold {
            return GateOutcome::Warn {
                gate: "volume_outlier",
                severity: GateSeverity::High,
                reason: format!("volume z-score {z:.2} exceeds threshold {}", self.config.outlier_z_threshold),
            };
        }
        GateOutcome::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::TickSource;
    use rust_decimal_macros::dec;

    fn tick(ts: chrono::DateTime<chrono::Utc>, close: Decimal) -> MarketTick {
        tick_with_volume(ts, close, dec!(1000))
    }

    fn tick_with_volume(ts: chrono::DateTime<chrono::Utc>, close: Decimal, volume: Decimal) -> MarketTick {
        MarketTick {
            symbol: Symbol::new("005930").unwrap(),
            ts,
            open: Some(close),
            high: Some(close),
            low: Some(close),
            close,
            volume,
            source: TickSource::KrxStream,
        }
    }

    #[test]
    fn negative_price_is_dropped_as_critical() {
        let chain = QualityGateChain::new(QualityConfig::default());
        let now = chrono::Utc::now();
        let bad = tick(now, dec!(-1));
        match chain.evaluate(&bad, now) {
            GateOutcome::Drop { severity, .. } => assert_eq!(severity, GateSeverity::Critical),
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_tick_is_dropped_silently() {
        let chain = QualityGateChain::new(QualityConfig::default());
        let now = chrono::Utc::now();
        let first = tick(now, dec!(70000));
        assert_eq!(chain.evaluate(&first, now), GateOutcome::Pass);
        match chain.evaluate(&first, now) {
            GateOutcome::Drop { gate, .. } => assert_eq!(gate, "duplicate"),
            other => panic!("expected duplicate drop, got {other:?}"),
        }
    }

    #[test]
    fn stale_tick_is_kept_with_a_warning() {
        let chain = QualityGateChain::new(QualityConfig::default());
        let now = chrono::Utc::now();
        let stale = tick(now - chrono::Duration::minutes(10), dec!(70000));
        match chain.evaluate(&stale, now) {
            GateOutcome::Warn { gate, .. } => assert_eq!(gate, "staleness"),
            other => panic!("expected staleness warn, got {other:?}"),
        }
    }

    #[test]
    fn a_volume_spike_is_kept_with_a_warning_never_dropped() {
        let chain = QualityGateChain::new(QualityConfig::default());
        let base = chrono::Utc::now();
        for i in 0i64..20 {
            let t = base + chrono::Duration::seconds(i);
            // Alternate slightly so the rolling window has nonzero variance
            // (an all-identical window would make the z-score undefined).
            let volume = if i % 2 == 0 { dec!(990) } else { dec!(1010) };
            let steady = tick_with_volume(t, dec!(70000), volume);
            assert_eq!(chain.evaluate(&steady, t), GateOutcome::Pass);
        }
        let spike_ts = base + chrono::Duration::seconds(20);
        let spike = tick_with_volume(spike_ts, dec!(70000), dec!(1_000_000));
        match chain.evaluate(&spike, spike_ts) {
            GateOutcome::Warn { gate, severity, .. } => {
                assert_eq!(gate, "volume_outlier");
                assert_eq!(severity, GateSeverity::High);
            }
            other => panic!("expected volume_outlier warn, got {other:?}"),
        }
    }

    #[test]
    fn inconsistent_ohlc_is_dropped_as_high_severity() {
        let chain = QualityGateChain::new(QualityConfig::default());
        let now = chrono::Utc::now();
        let mut bad = tick(now, dec!(70000));
        bad.high = Some(dec!(100));
        match chain.evaluate(&bad, now) {
            GateOutcome::Drop { gate, severity, .. } => {
                assert_eq!(gate, "ohlc_consistency");
                assert_eq!(severity, GateSeverity::High);
            }
            other => panic!("expected ohlc drop, got {other:?}"),
        }
    }
}
