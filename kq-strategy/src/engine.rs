//! Dispatch loop (spec.md §4.F): on every `indicators_updated`, runs every
//! active strategy subscribed to that symbol, bounded by a per-strategy
//! timeout, auto-deactivating after three consecutive timeouts.
//!
//! Grounded on `src/engine/trader.rs`'s event-loop shape (`Trader::run`)
//! but replacing direct polling with bus subscription + `tokio::time::timeout`,
//! since a strategy's `analyze` is synchronous user code that must not be
//! allowed to stall the whole engine.

use crate::performance::{PerformanceMetrics, PerformanceTracker};
use crate::registry::{RegisteredStrategy, StrategyRegistry, SymbolScope};
use crate::strategy::{AnalysisSnapshot, Strategy};
use kq_bus::payload::{CandleClosed, IndicatorsUpdated, PositionUpdated, StrategyActivated, StrategyDeactivated};
use kq_bus::{BusMessage, EventBus, Topic};
use kq_cache::InMemoryCache;
use kq_instrument::StrategyId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Strategy dispatch bound (spec.md §5 "Strategy `analyze` has a 200 ms
/// timeout").
pub const DEFAULT_STRATEGY_TIMEOUT: Duration = Duration::from_millis(200);

pub struct StrategyEngine {
    bus: Arc<EventBus>,
    cache: Arc<InMemoryCache>,
    registry: StrategyRegistry,
    performance: PerformanceTracker,
    timeout: Duration,
}

impl StrategyEngine {
    pub fn new(bus: Arc<EventBus>, cache: Arc<InMemoryCache>) -> Self {
        Self { bus, cache, registry: StrategyRegistry::new(), performance: PerformanceTracker::new(), timeout: DEFAULT_STRATEGY_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn performance(&self, strategy_id: &StrategyId) -> Option<PerformanceMetrics> {
        self.performance.metrics(strategy_id)
    }

    /// Loads a strategy and publishes `strategy_activated`.
    pub fn load(
        &self,
        id: StrategyId,
        strategy: Box<dyn Strategy>,
        scope: SymbolScope,
        priority_override: i32,
    ) -> Result<(), crate::error::StrategyError> {
        self.registry.register(id.clone(), strategy, scope, priority_override)?;
        self.bus.publish(BusMessage::StrategyActivated(StrategyActivated { strategy_name: id, ts: chrono::Utc::now() }));
        Ok(())
    }

    /// Unloads a strategy and publishes `strategy_deactivated`.
    pub fn unload(&self, id: &StrategyId, reason: &str) -> Result<(), crate::error::StrategyError> {
        self.registry.unregister(id)?;
        self.bus.publish(BusMessage::StrategyDeactivated(StrategyDeactivated {
            strategy_name: id.clone(),
            reason: reason.to_string(),
            ts: chrono::Utc::now(),
        }));
        Ok(())
    }

    pub fn reload(
        &self,
        id: StrategyId,
        strategy: Box<dyn Strategy>,
        scope: SymbolScope,
        priority_override: i32,
    ) -> Result<(), crate::error::StrategyError> {
        self.registry.reload(id.clone(), strategy, scope, priority_override)?;
        self.bus.publish(BusMessage::StrategyActivated(StrategyActivated { strategy_name: id, ts: chrono::Utc::now() }));
        Ok(())
    }

    /// Builds the [`AnalysisSnapshot`] for one `indicators_updated` event
    /// by pairing it with the candle it was computed from (read back from
    /// the candle ring the pipeline owns) and, for strategies that asked,
    /// cached indicator state for other symbols.
    fn build_snapshot(&self, event: &IndicatorsUpdated, strategy: &RegisteredStrategy) -> Option<AnalysisSnapshot> {
        let candle = self
            .cache
            .get_candles(&event.symbol, event.interval)
            .into_iter()
            .find(|c| c.ts == event.ts)
            .map(|c| CandleClosed {
                symbol: event.symbol.clone(),
                interval: c.interval,
                ts: c.ts,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
            })?;

        let other_symbols = strategy
            .instance
            .lock()
            .other_symbols()
            .into_iter()
            .filter_map(|symbol| self.cache.get_indicators(&symbol, event.interval).map(|snap| (symbol, snap)))
            .collect();

        Some(AnalysisSnapshot {
            symbol: event.symbol.clone(),
            ts: event.ts,
            candle,
            indicators: event.values.clone(),
            other_symbols,
        })
    }

    /// Dispatches one `indicators_updated` event to every active strategy
    /// subscribed to `event.symbol` (spec.md §4.F "Dispatch").
    pub async fn on_indicators_updated(&self, event: IndicatorsUpdated) {
        for (id, entry) in self.registry.active_for_symbol(&event.symbol) {
            let required = entry.instance.lock().required_indicators();
            if !required.iter().all(|key| event.values.contains_key(key)) {
                debug!(strategy = %id, symbol = %event.symbol, "required indicators not yet present, skipping dispatch");
                continue;
            }

            let Some(snapshot) = self.build_snapshot(&event, &entry) else {
                debug!(strategy = %id, symbol = %event.symbol, "candle not found in cache ring, skipping dispatch");
                continue;
            };

            let entry_for_blocking = Arc::clone(&entry);
            let handle = tokio::task::spawn_blocking(move || entry_for_blocking.instance.lock().analyze(&snapshot));

            match tokio::time::timeout(self.timeout, handle).await {
                Ok(Ok(signal)) => {
                    entry.record_success();
                    if let Some(signal) = signal {
                        self.performance.note_signal(&signal);
                        self.bus.publish(BusMessage::TradingSignal(signal));
                    }
                }
                Ok(Err(join_error)) => {
                    warn!(strategy = %id, error = %join_error, "strategy analyze panicked");
                }
                Err(_) => {
                    warn!(strategy = %id, timeout_ms = self.timeout.as_millis(), "strategy analyze timed out");
                    if entry.record_timeout() {
                        entry.deactivate();
                        info!(strategy = %id, "auto-deactivated after three consecutive timeouts");
                        let _ = self.unload(&id, "timeout");
                    }
                }
            }
        }
    }

    pub fn on_position_updated(&self, event: &PositionUpdated) {
        self.performance.note_position_update(event);
    }

    /// Subscribes to `indicators_updated` and `position_updated` and runs
    /// the dispatch/performance-tracking loops for the engine's lifetime.
    pub fn spawn(self: Arc<Self>) -> (u64, u64) {
        let dispatch_engine = Arc::clone(&self);
        let dispatch = self.bus.clone().subscribe_with_handler(Topic::IndicatorsUpdated, move |envelope| {
            let engine = Arc::clone(&dispatch_engine);
            async move {
                if let BusMessage::IndicatorsUpdated(event) = envelope.payload {
                    engine.on_indicators_updated(event).await;
                }
            }
        });

        let performance_engine = Arc::clone(&self);
        let performance = self.bus.clone().subscribe_with_handler(Topic::PositionUpdated, move |envelope| {
            let engine = Arc::clone(&performance_engine);
            async move {
                if let BusMessage::PositionUpdated(event) = envelope.payload {
                    engine.on_position_updated(&event);
                }
            }
        });

        (dispatch, performance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin_ma::{MovingAverageCrossConfig, MovingAverageCrossStrategy};
    use kq_cache::CachedCandle;
    use kq_instrument::{Interval, Symbol};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn bus_and_cache() -> (Arc<EventBus>, Arc<InMemoryCache>) {
        (EventBus::new("kq-strategy-test", 16), Arc::new(InMemoryCache::with_default_budget(200)))
    }

    #[tokio::test]
    async fn dispatch_runs_the_builtin_strategy_and_publishes_a_buy_signal() {
        let (bus, cache) = bus_and_cache();
        let engine = Arc::new(StrategyEngine::new(Arc::clone(&bus), Arc::clone(&cache)));
        engine
            .load(
                StrategyId::new("ma_1m_5m"),
                Box::new(MovingAverageCrossStrategy::new(MovingAverageCrossConfig::default())),
                SymbolScope::All,
                0,
            )
            .unwrap();

        let symbol = Symbol::new("005930").unwrap();
        let ts = chrono::Utc::now();
        cache.push_candle(
            &symbol,
            Interval::M1,
            CachedCandle { interval: Interval::M1, ts, open: dec!(75100), high: dec!(75100), low: dec!(75100), close: dec!(75100), volume: dec!(1000) },
        );

        let mut signal_sub = bus.subscribe(Topic::TradingSignal);

        let values = BTreeMap::from([("sma_5".to_string(), dec!(75000))]);
        engine
            .on_indicators_updated(IndicatorsUpdated { symbol: symbol.clone(), interval: Interval::M1, ts, candle_close: dec!(75100), values })
            .await;

        let delivery = tokio::time::timeout(Duration::from_millis(500), signal_sub.recv()).await.expect("signal published").unwrap();
        let kq_bus::Delivery::Message(envelope) = delivery else { panic!("expected message") };
        let BusMessage::TradingSignal(signal) = envelope.payload else { panic!("wrong payload") };
        assert_eq!(signal.action, kq_bus::payload::SignalAction::Buy);
    }

    #[tokio::test]
    async fn missing_required_indicator_skips_dispatch_without_touching_timeout_counter() {
        let (bus, cache) = bus_and_cache();
        let engine = StrategyEngine::new(bus, cache);
        engine
            .load(
                StrategyId::new("ma_1m_5m"),
                Box::new(MovingAverageCrossStrategy::new(MovingAverageCrossConfig::default())),
                SymbolScope::All,
                0,
            )
            .unwrap();

        let symbol = Symbol::new("005930").unwrap();
        engine
            .on_indicators_updated(IndicatorsUpdated {
                symbol: symbol.clone(),
                interval: Interval::M1,
                ts: chrono::Utc::now(),
                candle_close: dec!(75100),
                values: BTreeMap::new(),
            })
            .await;

        let entry = engine.registry().get(&StrategyId::new("ma_1m_5m")).unwrap();
        assert!(entry.is_active());
    }
}
