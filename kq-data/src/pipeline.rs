//! Market Data Pipeline (spec.md §4.D): runs every [`MarketTick`] through
//! the quality-gate chain, assembles candles per `(symbol, interval)`, and
//! publishes `market_data_received` / `candle_closed` to the bus.

use crate::candle::CandleAssembler;
use crate::quality::{GateOutcome, QualityConfig, QualityGateChain};
use crate::tick::MarketTick;
use chrono::Utc;
use kq_bus::{BusMessage, EventBus};
use kq_bus::payload::{CandleClosed, MarketDataReceived, SystemStatus, SystemStatusKind};
use kq_cache::types::{CachedCandle, MarketSnapshot};
use kq_cache::InMemoryCache;
use kq_instrument::Interval;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How often [`MarketDataPipeline::spawn_stale_sweep`] checks for buckets
/// whose wall-clock deadline has elapsed without a later tick arriving.
pub const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Owns one [`CandleAssembler`] per configured interval and the single
/// quality-gate chain shared across all of them (the chain is keyed
/// internally by symbol, so sharing it across intervals is safe — each
/// `(symbol, interval)` candle builder is still only ever touched by the
/// one task that calls [`MarketDataPipeline::ingest`], satisfying the
/// single-writer property of spec.md §4.D).
pub struct MarketDataPipeline {
    bus: Arc<EventBus>,
    cache: Arc<InMemoryCache>,
    quality: QualityGateChain,
    assemblers: Vec<(Interval, CandleAssembler)>,
}

impl MarketDataPipeline {
    pub fn new(bus: Arc<EventBus>, cache: Arc<InMemoryCache>, intervals: Vec<Interval>, quality: QualityConfig) -> Self {
        let assemblers = intervals.into_iter().map(|i| (i, CandleAssembler::new(i))).collect();
        Self {
            bus,
            cache,
            quality: QualityGateChain::new(quality),
            assemblers,
        }
    }

    /// Runs one tick through the gate chain, updates the rolling ring and
    /// latest market snapshot, then assembles candles for every
    /// configured interval (spec.md §4.D steps 1-3).
    pub fn ingest(&self, tick: MarketTick) {
        let now = Utc::now();
        match self.quality.evaluate(&tick, now) {
            GateOutcome::Drop { gate, severity, reason } => {
                debug!(symbol = %tick.symbol, gate, ?severity, reason, "tick dropped by quality gate");
                self.bus.publish(BusMessage::SystemStatus(SystemStatus {
                    kind: SystemStatusKind::QualityIssue,
                    component: "kq-data".into(),
                    detail: format!("{gate}: {reason}"),
                    ts: now,
                }));
                return;
            }
            GateOutcome::Warn { gate, reason, .. } => {
                warn!(symbol = %tick.symbol, gate, reason, "tick kept with a quality warning");
            }
            GateOutcome::Pass => {}
        }

        self.cache.put_market_snapshot(MarketSnapshot {
            symbol: tick.symbol.clone(),
            ts: tick.ts,
            open: tick.open.unwrap_or(tick.close),
            high: tick.high.unwrap_or(tick.close),
            low: tick.low.unwrap_or(tick.close),
            close: tick.close,
            volume: tick.volume,
            source: tick.source.to_string(),
        });

        self.bus.publish(BusMessage::MarketDataReceived(MarketDataReceived {
            symbol: tick.symbol.clone(),
            ts: tick.ts,
            close: tick.close,
            volume: tick.volume,
        }));

        for (interval, assembler) in &self.assemblers {
            if let Some(closed) = assembler.ingest(&tick) {
                self.publish_closed_candle(*interval, closed);
            }
        }
    }

    fn publish_closed_candle(&self, interval: Interval, closed: crate::candle::ClosedCandle) {
        self.cache.push_candle(
            &closed.symbol,
            interval,
            CachedCandle {
                interval,
                ts: closed.ts,
                open: closed.open,
                high: closed.high,
                low: closed.low,
                close: closed.close,
                volume: closed.volume,
            },
        );
        self.bus.publish(BusMessage::CandleClosed(CandleClosed {
            symbol: closed.symbol,
            interval,
            ts: closed.ts,
            open: closed.open,
            high: closed.high,
            low: closed.low,
            close: closed.close,
            volume: closed.volume,
        }));
    }

    /// Force-closes any bucket across every `(symbol, interval)` whose
    /// wall-clock deadline has elapsed without a later tick arriving
    /// (spec.md §4.D). Called both directly (for tests) and from the
    /// periodic task spawned by [`Self::spawn_stale_sweep`].
    pub fn sweep_stale_buckets(&self) {
        let now = Utc::now();
        for (interval, assembler) in &self.assemblers {
            for closed in assembler.sweep_stale(now) {
                debug!(symbol = %closed.symbol, interval = ?interval, "candle force-closed by wall clock");
                self.publish_closed_candle(*interval, closed);
            }
        }
    }

    /// Spawns the periodic sweep task that force-closes stale buckets on
    /// wall-clock time, independent of tick arrival (spec.md §4.D).
    pub fn spawn_stale_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STALE_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                pipeline.sweep_stale_buckets();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::TickSource;
    use kq_instrument::Symbol;
    use rust_decimal_macros::dec;

    fn bus_and_cache() -> (Arc<EventBus>, Arc<InMemoryCache>) {
        (EventBus::new("kq-data-test", 64), Arc::new(InMemoryCache::with_default_budget(200)))
    }

    fn tick(ts: chrono::DateTime<Utc>, close: rust_decimal::Decimal) -> MarketTick {
        MarketTick {
            symbol: Symbol::new("005930").unwrap(),
            ts,
            open: Some(close),
            high: Some(close),
            low: Some(close),
            close,
            volume: dec!(100),
            source: TickSource::KrxStream,
        }
    }

    #[tokio::test]
    async fn passing_tick_updates_market_snapshot_and_publishes() {
        let (bus, cache) = bus_and_cache();
        let pipeline = MarketDataPipeline::new(bus.clone(), cache.clone(), vec![Interval::M1], QualityConfig::default());
        let mut sub = bus.subscribe(kq_bus::Topic::MarketDataReceived);

        pipeline.ingest(tick(Utc::now(), dec!(75000)));

        assert!(cache.get_market_snapshot(&Symbol::new("005930").unwrap()).is_some());
        match sub.recv().await {
            kq_bus::bus::Delivery::Message(envelope) => match envelope.payload {
                BusMessage::MarketDataReceived(m) => assert_eq!(m.close, dec!(75000)),
                other => panic!("wrong variant: {other:?}"),
            },
            other => panic!("expected MarketDataReceived, got {other:?}"),
        }
    }

    #[test]
    fn candle_close_on_bucket_rollover_is_pushed_to_the_ring() {
        let (bus, cache) = bus_and_cache();
        let pipeline = MarketDataPipeline::new(bus, cache.clone(), vec![Interval::M1], QualityConfig::default());
        let t0 = chrono::DateTime::<Utc>::from_timestamp(60, 0).unwrap();
        pipeline.ingest(tick(t0, dec!(100)));
        pipeline.ingest(tick(t0 + chrono::Duration::seconds(61), dec!(110)));

        let candles = cache.get_candles(&Symbol::new("005930").unwrap(), Interval::M1);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, dec!(100));
    }

    #[test]
    fn a_stale_bucket_is_force_closed_by_wall_clock_sweep_without_a_later_tick() {
        let (bus, cache) = bus_and_cache();
        let pipeline = MarketDataPipeline::new(bus, cache.clone(), vec![Interval::M1], QualityConfig::default());
        let t0 = chrono::DateTime::<Utc>::from_timestamp(60, 0).unwrap();
        pipeline.ingest(tick(t0, dec!(100)));

        // No later tick ever arrives; only wall-clock time has moved on.
        assert!(cache.get_candles(&Symbol::new("005930").unwrap(), Interval::M1).is_empty());
        pipeline.sweep_stale_buckets();

        let candles = cache.get_candles(&Symbol::new("005930").unwrap(), Interval::M1);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, dec!(100));
    }

    #[test]
    fn negative_price_tick_is_dropped_and_does_not_update_snapshot() {
        let (bus, cache) = bus_and_cache();
        let pipeline = MarketDataPipeline::new(bus, cache.clone(), vec![Interval::M1], QualityConfig::default());
        pipeline.ingest(tick(Utc::now(), dec!(-5)));
        assert!(cache.get_market_snapshot(&Symbol::new("005930").unwrap()).is_none());
    }
}
