//! The required built-in "1m vs 5m moving average" strategy (spec.md
//! §4.F), kept as the reference strategy test designs are written
//! against. Triggers on 1-minute candles; holds a single per-symbol
//! position at a time.

use crate::schema::{ParamSpec, ParamType, ParameterSchema};
use crate::strategy::{AnalysisSnapshot, Strategy};
use chrono::{NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use kq_bus::payload::{SignalAction, TradingSignal};
use kq_instrument::StrategyId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;

/// Per-symbol position state owned exclusively by this strategy instance
/// (spec.md §4.F: "a strategy instance holds its own private state").
#[derive(Debug, Clone, Default)]
struct HoldingState {
    is_holding: bool,
    entry_price: Decimal,
    entry_ts: Option<chrono::DateTime<Utc>>,
}

/// `k` bounds how quickly confidence saturates as price pulls away from
/// `sma_5`; `turnover_floor` optionally filters out illiquid symbols.
#[derive(Debug, Clone)]
pub struct MovingAverageCrossConfig {
    pub k: Decimal,
    pub turnover_floor: Option<Decimal>,
    pub session_close_time: NaiveTime,
}

impl Default for MovingAverageCrossConfig {
    fn default() -> Self {
        Self {
            k: dec!(0.05),
            turnover_floor: None,
            session_close_time: NaiveTime::from_hms_opt(15, 20, 0).expect("valid time"),
        }
    }
}

pub struct MovingAverageCrossStrategy {
    config: MovingAverageCrossConfig,
    state: HoldingState,
}

impl MovingAverageCrossStrategy {
    pub fn new(config: MovingAverageCrossConfig) -> Self {
        Self { config, state: HoldingState::default() }
    }

    fn session_closed_at(&self, ts: chrono::DateTime<Utc>) -> bool {
        let local = ts.with_timezone(&Seoul);
        local.time() >= self.config.session_close_time
    }

    fn turnover_passes(&self, snapshot: &AnalysisSnapshot) -> bool {
        match self.config.turnover_floor {
            None => true,
            Some(floor) => snapshot
                .indicators
                .get("turnover_5d")
                .map(|turnover| *turnover >= floor)
                .unwrap_or(true),
        }
    }
}

impl Strategy for MovingAverageCrossStrategy {
    fn name(&self) -> &str {
        "ma_1m_5m"
    }

    fn required_indicators(&self) -> BTreeSet<String> {
        BTreeSet::from(["sma_5".to_string()])
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::from([
            (
                "k".to_string(),
                ParamSpec::new(ParamType::Decimal, serde_json::json!("0.05"), "confidence sensitivity divisor"),
            ),
            (
                "turnover_floor".to_string(),
                ParamSpec::new(ParamType::Decimal, serde_json::Value::Null, "minimum 5-day turnover to trade"),
            ),
        ])
    }

    fn analyze(&mut self, snapshot: &AnalysisSnapshot) -> Option<TradingSignal> {
        let p = snapshot.candle.close;
        let m = *snapshot.indicators.get("sma_5")?;

        if self.state.is_holding && self.session_closed_at(snapshot.ts) {
            self.state.is_holding = false;
            self.state.entry_price = Decimal::ZERO;
            self.state.entry_ts = None;
            return Some(TradingSignal {
                strategy_name: StrategyId::new(self.name()),
                symbol: snapshot.symbol.clone(),
                action: SignalAction::HoldExit,
                confidence: Decimal::ONE,
                suggested_price: None,
                reason: "session close forced exit".to_string(),
                ts: snapshot.ts,
                liquidation: true,
                source: self.name().to_string(),
            });
        }

        if !self.turnover_passes(snapshot) {
            return None;
        }

        if m.is_zero() {
            return None;
        }

        if p > m && !self.state.is_holding {
            let confidence = ((p - m) / m / self.config.k).clamp(Decimal::ZERO, Decimal::ONE);
            self.state.is_holding = true;
            self.state.entry_price = p;
            self.state.entry_ts = Some(snapshot.ts);
            return Some(TradingSignal {
                strategy_name: StrategyId::new(self.name()),
                symbol: snapshot.symbol.clone(),
                action: SignalAction::Buy,
                confidence,
                suggested_price: Some(p),
                reason: format!("close {p} above sma_5 {m}"),
                ts: snapshot.ts,
                liquidation: false,
                source: self.name().to_string(),
            });
        }

        if p <= m && self.state.is_holding {
            let confidence = ((m - p) / m / self.config.k).clamp(Decimal::ZERO, Decimal::ONE);
            self.state.is_holding = false;
            self.state.entry_price = Decimal::ZERO;
            self.state.entry_ts = None;
            return Some(TradingSignal {
                strategy_name: StrategyId::new(self.name()),
                symbol: snapshot.symbol.clone(),
                action: SignalAction::Sell,
                confidence,
                suggested_price: Some(p),
                reason: format!("close {p} at or below sma_5 {m}"),
                ts: snapshot.ts,
                liquidation: false,
                source: self.name().to_string(),
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_bus::payload::CandleClosed;
    use kq_instrument::{Interval, Symbol};
    use std::collections::BTreeMap;

    fn snapshot(close: Decimal, sma_5: Decimal, ts: chrono::DateTime<Utc>) -> AnalysisSnapshot {
        let symbol = Symbol::new("005930").unwrap();
        AnalysisSnapshot {
            symbol: symbol.clone(),
            ts,
            candle: CandleClosed {
                symbol,
                interval: Interval::M1,
                ts,
                open: close,
                high: close,
                low: close,
                close,
                volume: dec!(1000),
            },
            indicators: BTreeMap::from([("sma_5".to_string(), sma_5)]),
            other_symbols: BTreeMap::new(),
        }
    }

    #[test]
    fn buys_once_when_price_crosses_above_sma_5() {
        let mut strategy = MovingAverageCrossStrategy::new(MovingAverageCrossConfig::default());
        let ts = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let signal = strategy.analyze(&snapshot(dec!(75100), dec!(75000), ts)).expect("buy signal");
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence > Decimal::ZERO);

        assert!(strategy.analyze(&snapshot(dec!(75150), dec!(75000), ts)).is_none(), "already holding, no repeat buy");
    }

    #[test]
    fn sells_when_price_falls_back_to_or_below_sma_5() {
        let mut strategy = MovingAverageCrossStrategy::new(MovingAverageCrossConfig::default());
        let ts = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        strategy.analyze(&snapshot(dec!(75100), dec!(75000), ts)).expect("buy signal");
        let signal = strategy.analyze(&snapshot(dec!(74900), dec!(75000), ts)).expect("sell signal");
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[test]
    fn forces_exit_at_session_close_regardless_of_price() {
        let mut strategy = MovingAverageCrossStrategy::new(MovingAverageCrossConfig::default());
        let morning = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        strategy.analyze(&snapshot(dec!(75100), dec!(75000), morning)).expect("buy signal");

        // 15:20 KST on 2026-07-28 is 06:20 UTC.
        let close_time = Utc.with_ymd_and_hms(2026, 7, 28, 6, 20, 0).unwrap();
        let signal = strategy.analyze(&snapshot(dec!(75200), dec!(75000), close_time)).expect("forced exit");
        assert_eq!(signal.action, SignalAction::HoldExit);
        assert!(signal.liquidation);
    }

    #[test]
    fn skips_when_turnover_is_below_the_configured_floor() {
        let mut strategy = MovingAverageCrossStrategy::new(MovingAverageCrossConfig {
            turnover_floor: Some(dec!(1_000_000_000)),
            ..MovingAverageCrossConfig::default()
        });
        let ts = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let mut snap = snapshot(dec!(75100), dec!(75000), ts);
        snap.indicators.insert("turnover_5d".to_string(), dec!(500_000_000));
        assert!(strategy.analyze(&snap).is_none());
    }
}
