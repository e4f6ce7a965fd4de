use kq_bus::{BusMessage, Delivery, EventBus, Topic};
use kq_cache::InMemoryCache;
use kq_instrument::{Interval, StrategyId, Symbol};
use kq_strategy::{MovingAverageCrossConfig, MovingAverageCrossStrategy, StrategyEngine, SymbolScope};
use kq_ta::{AnalyzerConfig, TechnicalAnalyzer};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

/// End-to-end: candle_closed -> kq-ta computes sma_5 -> kq-strategy's
/// built-in moving-average strategy fires a BUY, reproducing spec.md
/// scenario 1's five-candle sequence.
#[tokio::test]
async fn five_candle_close_sequence_yields_a_buy_signal() {
    let bus = EventBus::new("kq-strategy-integration", 32);
    let cache = Arc::new(InMemoryCache::with_default_budget(200));

    let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::clone(&bus), Arc::clone(&cache), AnalyzerConfig::default()));
    analyzer.spawn();

    let engine = Arc::new(StrategyEngine::new(Arc::clone(&bus), Arc::clone(&cache)));
    engine
        .load(StrategyId::new("ma_1m_5m"), Box::new(MovingAverageCrossStrategy::new(MovingAverageCrossConfig::default())), SymbolScope::All, 0)
        .unwrap();
    engine.spawn();

    let mut signal_sub = bus.subscribe(Topic::TradingSignal);
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
        // Give the analyzer's and engine's worker tasks a turn to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let delivery = tokio::time::timeout(Duration::from_secs(2), signal_sub.recv()).await.expect("a signal was published").unwrap();
    let Delivery::Message(envelope) = delivery else { panic!("expected a message, not a lag marker") };
    let BusMessage::TradingSignal(signal) = envelope.payload else { panic!("wrong payload variant") };

    assert_eq!(signal.symbol, symbol);
    assert_eq!(signal.action, kq_bus::payload::SignalAction::Buy);
    assert_eq!(signal.suggested_price, Some(dec!(75100)));
    assert!(signal.confidence > rust_decimal::Decimal::ZERO);
}

#[tokio::test]
async fn unloading_a_strategy_stops_further_dispatch() {
    let bus = EventBus::new("kq-strategy-integration", 32);
    let cache = Arc::new(InMemoryCache::with_default_budget(200));
    let engine = Arc::new(StrategyEngine::new(Arc::clone(&bus), Arc::clone(&cache)));
    let id = StrategyId::new("ma_1m_5m");
    engine.load(id.clone(), Box::new(MovingAverageCrossStrategy::new(MovingAverageCrossConfig::default())), SymbolScope::All, 0).unwrap();
    engine.unload(&id, "manual unload").unwrap();

    assert!(engine.registry().get(&id).is_none());
}
