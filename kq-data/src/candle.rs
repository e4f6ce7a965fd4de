use crate::tick::MarketTick;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kq_instrument::{Interval, Symbol};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedCandle {
    pub symbol: Symbol,
    pub interval: Interval,
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

struct Builder {
    bucket_start: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl Builder {
    fn new(bucket_start: DateTime<Utc>, tick: &MarketTick) -> Self {
        Self {
            bucket_start,
            open: tick.close,
            high: tick.close,
            low: tick.close,
            close: tick.close,
            volume: tick.volume,
        }
    }

    fn update(&mut self, tick: &MarketTick) {
        self.high = self.high.max(tick.close);
        self.low = self.low.min(tick.close);
        self.close = tick.close;
        self.volume += tick.volume;
    }

    fn close_out(&self, symbol: Symbol, interval: Interval) -> ClosedCandle {
        ClosedCandle {
            symbol,
            interval,
            ts: self.bucket_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

fn bucket_start(ts: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    let width = interval.duration();
    let epoch_seconds = ts.timestamp();
    let width_seconds = width.num_seconds().max(1);
    let aligned = (epoch_seconds / width_seconds) * width_seconds;
    DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(ts)
}

/// Assembles candles for one `interval` across every symbol. One
/// [`Builder`] owned per symbol in a [`DashMap`], so — as long as only the
/// pipeline task calls [`CandleAssembler::ingest`] — there is a single
/// writer per `(symbol, interval)` at all times (spec.md §8 invariant).
pub struct CandleAssembler {
    interval: Interval,
    builders: DashMap<Symbol, Builder>,
}

impl CandleAssembler {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            builders: DashMap::new(),
        }
    }

    /// Feeds one tick in. Returns the candle that just closed if `tick`
    /// belongs to a new bucket for its symbol.
    pub fn ingest(&self, tick: &MarketTick) -> Option<ClosedCandle> {
        let bucket = bucket_start(tick.ts, self.interval);
        let mut entry = self.builders.entry(tick.symbol.clone()).or_insert_with(|| Builder::new(bucket, tick));

        if entry.bucket_start == bucket {
            entry.update(tick);
            return None;
        }

        let closed = entry.close_out(tick.symbol.clone(), self.interval);
        *entry = Builder::new(bucket, tick);
        Some(closed)
    }

    /// Force-closes every open bucket whose `bucket_start + interval` has
    /// already elapsed versus wall-clock `now`, even though no later tick
    /// has arrived yet (spec.md §4.D: "when a bucket closes (wall clock
    /// crosses the next boundary OR a tick for a later bucket arrives)").
    /// Closed symbols are removed from `builders` so a subsequent tick for
    /// the same symbol starts a fresh bucket rather than re-closing a
    /// candle that was already force-closed and published.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<ClosedCandle> {
        let width = self.interval.duration();
        let stale: Vec<Symbol> = self
            .builders
            .iter()
            .filter(|entry| now >= entry.bucket_start + width)
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|symbol| self.builders.remove(&symbol).map(|(_, builder)| builder.close_out(symbol, self.interval)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::TickSource;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, ts: DateTime<Utc>, close: Decimal) -> MarketTick {
        MarketTick {
            symbol: Symbol::new(symbol).unwrap(),
            ts,
            open: None,
            high: None,
            low: None,
            close,
            volume: dec!(10),
            source: TickSource::KrxStream,
        }
    }

    #[test]
    fn ticks_within_the_same_bucket_accumulate_without_closing() {
        let assembler = CandleAssembler::new(Interval::M1);
        let t0 = DateTime::<Utc>::from_timestamp(60, 0).unwrap();
        assert!(assembler.ingest(&tick("005930", t0, dec!(100))).is_none());
        assert!(assembler.ingest(&tick("005930", t0 + chrono::Duration::seconds(30), dec!(105))).is_none());
    }

    #[test]
    fn crossing_a_bucket_boundary_closes_the_previous_candle() {
        let assembler = CandleAssembler::new(Interval::M1);
        let t0 = DateTime::<Utc>::from_timestamp(60, 0).unwrap();
        assembler.ingest(&tick("005930", t0, dec!(100)));
        assembler.ingest(&tick("005930", t0 + chrono::Duration::seconds(10), dec!(110)));
        let closed = assembler
            .ingest(&tick("005930", t0 + chrono::Duration::seconds(61), dec!(90)))
            .expect("bucket should have rolled over");
        assert_eq!(closed.open, dec!(100));
        assert_eq!(closed.high, dec!(110));
        assert_eq!(closed.low, dec!(100));
        assert_eq!(closed.close, dec!(110));
    }

    #[test]
    fn a_stale_bucket_is_force_closed_by_wall_clock_even_without_a_later_tick() {
        let assembler = CandleAssembler::new(Interval::M1);
        let t0 = DateTime::<Utc>::from_timestamp(60, 0).unwrap();
        assembler.ingest(&tick("005930", t0, dec!(100)));
        assembler.ingest(&tick("005930", t0 + chrono::Duration::seconds(10), dec!(110)));

        assert!(assembler.sweep_stale(t0 + chrono::Duration::seconds(30)).is_empty());

        let closed = assembler.sweep_stale(t0 + chrono::Duration::seconds(61));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].symbol.as_str(), "005930");
        assert_eq!(closed[0].close, dec!(110));

        // Swept buckets are removed, so a later tick for the same symbol
        // starts a fresh bucket instead of re-closing the same candle.
        assert!(assembler.sweep_stale(t0 + chrono::Duration::seconds(62)).is_empty());
    }

    #[test]
    fn separate_symbols_are_tracked_independently() {
        let assembler = CandleAssembler::new(Interval::M1);
        let t0 = DateTime::<Utc>::from_timestamp(60, 0).unwrap();
        assembler.ingest(&tick("005930", t0, dec!(100)));
        assembler.ingest(&tick("000660", t0, dec!(200)));
        assert!(assembler.ingest(&tick("005930", t0 + chrono::Duration::seconds(5), dec!(101))).is_none());
        assert!(assembler.ingest(&tick("000660", t0 + chrono::Duration::seconds(5), dec!(201))).is_none());
    }
}
