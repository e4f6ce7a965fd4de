use kq_bus::{BusMessage, Delivery, EventBus, Topic};
use kq_cache::InMemoryCache;
use kq_instrument::{Interval, Symbol};
use kq_ta::{AnalyzerConfig, TechnicalAnalyzer};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

/// Reproduces spec.md scenario 1's five-candle close sequence end to end
/// over the real event bus: `candle_closed` in, `indicators_updated` out
/// with `sma_5 = 75_000`.
#[tokio::test]
async fn candle_closed_over_the_bus_yields_indicators_updated_with_sma_5() {
    let bus = EventBus::new("kq-ta-integration", 32);
    let cache = Arc::new(InMemoryCache::with_default_budget(200));
    let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::clone(&bus), Arc::clone(&cache), AnalyzerConfig::default()));
    analyzer.spawn();

    let mut sub = bus.subscribe(Topic::IndicatorsUpdated);
    let symbol = Symbol::new("005930").unwrap();
    let t0 = chrono::Utc::now();
    let closes = [dec!(74900), dec!(74950), dec!(75000), dec!(75050), dec!(75100)];

    for (i, close) in closes.iter().enumerate() {
        bus.publish(BusMessage::CandleClosed(kq_bus::payload::CandleClosed {
            symbol: symbol.clone(),
            interval: Interval::M1,
            ts: t0 + chrono::Duration::minutes(i as i64),
            open: *close,
            high: *close + dec!(10),
            low: *close - dec!(10),
            close: *close,
            volume: dec!(1000),
        }));

        let delivery = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.expect("indicators_updated published").unwrap();
        let Delivery::Message(envelope) = delivery else { panic!("expected message") };
        let BusMessage::IndicatorsUpdated(update) = envelope.payload else { panic!("wrong payload") };

        if i == closes.len() - 1 {
            assert_eq!(update.values.get("sma_5"), Some(&dec!(75000)));
        } else {
            assert!(!update.values.contains_key("sma_5"), "sma_5 should only appear once the window is full");
        }
    }
}
