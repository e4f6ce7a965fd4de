//! Technical Analyzer (spec.md §4.E): recomputes the configured indicator
//! set on every `candle_closed` event, writes the snapshot to the KV
//! cache, and publishes `indicators_updated` with the full set so
//! strategies never need to re-read the cache for correctness.

use crate::config::AnalyzerConfig;
use crate::indicators::{Atr, Bollinger, Ema, Macd, Rsi, Sma, Stochastic};
use dashmap::DashMap;
use kq_bus::payload::{CandleClosed, IndicatorsUpdated};
use kq_bus::{BusMessage, EventBus};
use kq_cache::types::IndicatorSnapshot as CachedIndicatorSnapshot;
use kq_cache::InMemoryCache;
use kq_instrument::{Interval, Symbol};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

type Key = (Symbol, Interval);

/// Per-`(symbol, interval)` indicator state, owned exclusively by the
/// analyzer (spec.md §3 ownership: strategies read the published
/// snapshot, never these structs directly).
struct IndicatorState {
    smas: Vec<(usize, Sma)>,
    ema_fast: Ema,
    ema_slow: Ema,
    rsi: Rsi,
    macd: Macd,
    bollinger: Bollinger,
    stochastic: Stochastic,
    atr: Atr,
}

impl IndicatorState {
    fn new(config: &AnalyzerConfig) -> Self {
        Self {
            smas: config.sma_periods.iter().map(|p| (*p, Sma::new(*p))).collect(),
            ema_fast: Ema::new(config.ema_fast),
            ema_slow: Ema::new(config.ema_slow),
            rsi: Rsi::new(config.rsi_period),
            macd: Macd::new(config.macd_fast, config.macd_slow, config.macd_signal),
            bollinger: Bollinger::new(config.bollinger_period, config.bollinger_k),
            stochastic: Stochastic::new(config.stochastic_period, config.stochastic_d_period),
            atr: Atr::new(config.atr_period),
        }
    }
}

fn param_hash(config: &AnalyzerConfig) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    config.sma_periods.hash(&mut hasher);
    config.ema_fast.hash(&mut hasher);
    config.ema_slow.hash(&mut hasher);
    config.rsi_period.hash(&mut hasher);
    config.macd_fast.hash(&mut hasher);
    config.macd_slow.hash(&mut hasher);
    config.macd_signal.hash(&mut hasher);
    config.bollinger_period.hash(&mut hasher);
    config.stochastic_period.hash(&mut hasher);
    config.stochastic_d_period.hash(&mut hasher);
    config.atr_period.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct Fingerprint {
    last_ts: chrono::DateTime<chrono::Utc>,
    last_close: Decimal,
    param_hash: u64,
}

/// Recomputes indicators on every closed candle (spec.md §4.E).
pub struct TechnicalAnalyzer {
    bus: Arc<EventBus>,
    cache: Arc<InMemoryCache>,
    config: AnalyzerConfig,
    param_hash: u64,
    states: DashMap<Key, IndicatorState>,
    fingerprints: DashMap<Key, Fingerprint>,
}

impl TechnicalAnalyzer {
    pub fn new(bus: Arc<EventBus>, cache: Arc<InMemoryCache>, config: AnalyzerConfig) -> Self {
        let param_hash = param_hash(&config);
        Self {
            bus,
            cache,
            config,
            param_hash,
            states: DashMap::new(),
            fingerprints: DashMap::new(),
        }
    }

    /// Processes one closed candle. Returns `true` if a fresh snapshot was
    /// computed and published, `false` if the fingerprint short-circuit
    /// skipped recompute (spec.md §4.E step 4).
    pub fn on_candle_closed(&self, candle: &CandleClosed) -> bool {
        let key = (candle.symbol.clone(), candle.interval);
        let fingerprint = Fingerprint {
            last_ts: candle.ts,
            last_close: candle.close,
            param_hash: self.param_hash,
        };
        if self.fingerprints.get(&key).map(|f| *f == fingerprint).unwrap_or(false) {
            debug!(symbol = %candle.symbol, interval = ?candle.interval, "fingerprint unchanged, skipping recompute");
            return false;
        }

        let mut state = self
            .states
            .entry(key.clone())
            .or_insert_with(|| IndicatorState::new(&self.config));

        let mut values = BTreeMap::new();
        for (period, sma) in state.smas.iter_mut() {
            if let Some(v) = sma.update(candle.close) {
                values.insert(format!("sma_{period}"), v);
            }
        }
        if let Some(v) = state.ema_fast.update(candle.close) {
            values.insert(format!("ema_{}", self.config.ema_fast), v);
        }
        if let Some(v) = state.ema_slow.update(candle.close) {
            values.insert(format!("ema_{}", self.config.ema_slow), v);
        }
        if let Some(v) = state.rsi.update(candle.close) {
            values.insert(format!("rsi_{}", self.config.rsi_period), v);
        }
        if let Some(macd) = state.macd.update(candle.close) {
            values.insert("macd".into(), macd.macd);
            values.insert("macd_signal".into(), macd.signal);
            values.insert("macd_histogram".into(), macd.histogram);
        }
        if let Some(bb) = state.bollinger.update(candle.close) {
            values.insert("bb_lower".into(), bb.lower);
            values.insert("bb_mid".into(), bb.mid);
            values.insert("bb_upper".into(), bb.upper);
        }
        if let Some(stoch) = state.stochastic.update(candle.high, candle.low, candle.close) {
            values.insert("stoch_k".into(), stoch.k);
            values.insert("stoch_d".into(), stoch.d);
        }
        if let Some(v) = state.atr.update(candle.high, candle.low, candle.close) {
            values.insert(format!("atr_{}", self.config.atr_period), v);
        }
        drop(state);

        self.fingerprints.insert(key.clone(), fingerprint);

        self.cache.put_indicators(
            &candle.symbol,
            candle.interval,
            CachedIndicatorSnapshot {
                interval: candle.interval,
                ts: candle.ts,
                candle_close: candle.close,
                values: values.clone(),
            },
        );

        self.bus.publish(BusMessage::IndicatorsUpdated(IndicatorsUpdated {
            symbol: candle.symbol.clone(),
            interval: candle.interval,
            ts: candle.ts,
            candle_close: candle.close,
            values,
        }));
        true
    }

    /// Subscribes to `candle_closed` and runs [`Self::on_candle_closed`]
    /// for every event, on a dedicated worker task per spec.md §5.
    pub fn spawn(self: Arc<Self>) -> u64 {
        let analyzer = Arc::clone(&self);
        self.bus.clone().subscribe_with_handler(kq_bus::Topic::CandleClosed, move |envelope| {
            let analyzer = Arc::clone(&analyzer);
            async move {
                if let BusMessage::CandleClosed(candle) = envelope.payload {
                    analyzer.on_candle_closed(&candle);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(ts: chrono::DateTime<chrono::Utc>, close: Decimal) -> CandleClosed {
        CandleClosed {
            symbol: Symbol::new("005930").unwrap(),
            interval: Interval::M1,
            ts,
            open: close,
            high: close + dec!(10),
            low: close - dec!(10),
            close,
            volume: dec!(1000),
        }
    }

    #[test]
    fn sma_5_is_present_only_after_five_candles() {
        let bus = EventBus::new("kq-ta-test", 16);
        let cache = Arc::new(InMemoryCache::with_default_budget(200));
        let analyzer = TechnicalAnalyzer::new(bus, cache.clone(), AnalyzerConfig::default());

        let t0 = chrono::Utc::now();
        let closes = [dec!(74900), dec!(74950), dec!(75000), dec!(75050), dec!(75100)];
        for (i, c) in closes.iter().enumerate() {
            analyzer.on_candle_closed(&candle(t0 + chrono::Duration::minutes(i as i64), *c));
        }

        let snapshot = cache.get_indicators(&Symbol::new("005930").unwrap(), Interval::M1).unwrap();
        assert_eq!(snapshot.values.get("sma_5"), Some(&dec!(75000)));
    }

    #[test]
    fn identical_fingerprint_short_circuits_recompute() {
        let bus = EventBus::new("kq-ta-test", 16);
        let cache = Arc::new(InMemoryCache::with_default_budget(200));
        let analyzer = TechnicalAnalyzer::new(bus, cache, AnalyzerConfig::default());
        let c = candle(chrono::Utc::now(), dec!(75000));
        assert!(analyzer.on_candle_closed(&c));
        assert!(!analyzer.on_candle_closed(&c), "identical head fingerprint should skip recompute");
    }

    #[test]
    fn rsi_is_absent_before_the_window_is_full() {
        let bus = EventBus::new("kq-ta-test", 16);
        let cache = Arc::new(InMemoryCache::with_default_budget(200));
        let analyzer = TechnicalAnalyzer::new(bus, cache.clone(), AnalyzerConfig::default());
        let t0 = chrono::Utc::now();
        analyzer.on_candle_closed(&candle(t0, dec!(75000)));
        let snapshot = cache.get_indicators(&Symbol::new("005930").unwrap(), Interval::M1).unwrap();
        assert!(!snapshot.values.contains_key("rsi_14"));
    }
}
