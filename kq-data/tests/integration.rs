use kq_bus::bus::Delivery;
use kq_bus::payload::BusMessage;
use kq_bus::{EventBus, Topic};
use kq_cache::InMemoryCache;
use kq_data::tick::{MarketTick, TickSource};
use kq_data::{MarketDataPipeline, QualityConfig};
use kq_instrument::{Interval, Symbol};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn tick(symbol: &str, ts: chrono::DateTime<chrono::Utc>, close: rust_decimal::Decimal) -> MarketTick {
    MarketTick {
        symbol: Symbol::new(symbol).unwrap(),
        ts,
        open: Some(close),
        high: Some(close),
        low: Some(close),
        close,
        volume: dec!(500),
        source: TickSource::KrxStream,
    }
}

#[tokio::test]
async fn five_one_minute_candles_close_and_ring_holds_exactly_five() {
    let bus = EventBus::new("kq-data-test", 64);
    let cache = Arc::new(InMemoryCache::with_default_budget(200));
    let pipeline = MarketDataPipeline::new(bus.clone(), cache.clone(), vec![Interval::M1], QualityConfig::default());
    let mut candle_sub = bus.subscribe(Topic::CandleClosed);

    let t0 = chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap();
    let closes = [dec!(74900), dec!(74950), dec!(75000), dec!(75050), dec!(75100)];
    for (i, close) in closes.iter().enumerate() {
        // one tick per minute bucket, plus a tick into the *next* bucket to
        // force the previous one to close
        pipeline.ingest(tick("005930", t0 + chrono::Duration::minutes(i as i64), *close));
    }
    // roll over into a sixth bucket to flush the fifth candle
    pipeline.ingest(tick("005930", t0 + chrono::Duration::minutes(5), dec!(75150)));

    let mut closed = Vec::new();
    for _ in 0..5 {
        match candle_sub.recv().await {
            Delivery::Message(envelope) => match envelope.payload {
                BusMessage::CandleClosed(c) => closed.push(c),
                other => panic!("wrong variant: {other:?}"),
            },
            other => panic!("expected candle_closed, got {other:?}"),
        }
    }
    assert_eq!(closed.len(), 5);
    assert_eq!(closed.iter().map(|c| c.close).collect::<Vec<_>>(), closes);

    let ring = cache.get_candles(&Symbol::new("005930").unwrap(), Interval::M1);
    assert_eq!(ring.len(), 5);
    assert_eq!(ring[0].close, dec!(75100), "newest candle is at the head");
}

#[tokio::test]
async fn duplicate_ticks_do_not_change_the_ring() {
    let bus = EventBus::new("kq-data-test", 64);
    let cache = Arc::new(InMemoryCache::with_default_budget(200));
    let pipeline = MarketDataPipeline::new(bus, cache.clone(), vec![Interval::M1], QualityConfig::default());

    let t0 = chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap();
    let first = tick("000660", t0, dec!(120000));
    pipeline.ingest(first.clone());
    pipeline.ingest(first);

    let snapshot = cache.get_market_snapshot(&Symbol::new("000660").unwrap()).unwrap();
    assert_eq!(snapshot.close, dec!(120000));
}
