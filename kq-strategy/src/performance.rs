//! Performance tracking (spec.md §4.F): a rolling record of realized P&L
//! per strategy, with win rate / total return / max drawdown / Sharpe
//! exposed on query. Not on the dispatch hot path — updated opportunistically
//! as `trading_signal` and `position_updated` events pass through.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use kq_bus::payload::{PositionUpdated, TradingSignal};
use kq_instrument::{StrategyId, Symbol};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct StrategyRecord {
    /// `(ts, realized_pnl_delta)` for every closed or trimmed position
    /// attributed to this strategy.
    trades: Vec<(DateTime<Utc>, Decimal)>,
    daily_pnl: BTreeMap<NaiveDate, Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceMetrics {
    pub trade_count: usize,
    pub win_rate: Decimal,
    pub total_return: Decimal,
    pub max_drawdown: Decimal,
    pub sharpe: Option<Decimal>,
}

/// Grounded on the teacher's `jackbot/src/statistic/metric::{sharpe, drawdown}`
/// convention of computing ratio metrics from a rolling return series.
#[derive(Default)]
pub struct PerformanceTracker {
    last_strategy_for_symbol: DashMap<Symbol, StrategyId>,
    last_realized_pnl: DashMap<Symbol, Decimal>,
    records: DashMap<StrategyId, Mutex<StrategyRecord>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers which strategy most recently signaled on a symbol, so a
    /// later `position_updated` realized-P&L delta can be attributed back
    /// to it.
    pub fn note_signal(&self, signal: &TradingSignal) {
        self.last_strategy_for_symbol.insert(signal.symbol.clone(), signal.strategy_name.clone());
    }

    pub fn note_position_update(&self, update: &PositionUpdated) {
        let Some(strategy_id) = self.last_strategy_for_symbol.get(&update.symbol).map(|e| e.value().clone()) else {
            return;
        };
        let previous = self
            .last_realized_pnl
            .insert(update.symbol.clone(), update.realized_pnl)
            .unwrap_or(Decimal::ZERO);
        let delta = update.realized_pnl - previous;
        if delta.is_zero() {
            return;
        }

        let record = self.records.entry(strategy_id).or_default();
        let mut record = record.lock();
        record.trades.push((update.ts, delta));
        *record.daily_pnl.entry(update.ts.date_naive()).or_insert(Decimal::ZERO) += delta;
    }

    pub fn metrics(&self, strategy_id: &StrategyId) -> Option<PerformanceMetrics> {
        let record = self.records.get(strategy_id)?;
        let record = record.lock();
        if record.trades.is_empty() {
            return Some(PerformanceMetrics {
                trade_count: 0,
                win_rate: Decimal::ZERO,
                total_return: Decimal::ZERO,
                max_drawdown: Decimal::ZERO,
                sharpe: None,
            });
        }

        let wins = record.trades.iter().filter(|(_, pnl)| *pnl > Decimal::ZERO).count();
        let win_rate = Decimal::from(wins) / Decimal::from(record.trades.len());
        let total_return: Decimal = record.trades.iter().map(|(_, pnl)| *pnl).sum();

        let mut equity = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_drawdown = Decimal::ZERO;
        for (_, pnl) in &record.trades {
            equity += *pnl;
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max(peak - equity);
        }

        let sharpe = sharpe_from_daily(&record.daily_pnl);

        Some(PerformanceMetrics { trade_count: record.trades.len(), win_rate, total_return, max_drawdown, sharpe })
    }
}

/// Annualized-free Sharpe computed directly from the daily realized-P&L
/// series (mean / population std dev); `None` with fewer than two days
/// or zero variance, mirroring the teacher's zero-std-dev guard in
/// `SharpeRatio::calculate`.
fn sharpe_from_daily(daily_pnl: &BTreeMap<NaiveDate, Decimal>) -> Option<Decimal> {
    if daily_pnl.len() < 2 {
        return None;
    }
    let n = Decimal::from(daily_pnl.len());
    let mean: Decimal = daily_pnl.values().sum::<Decimal>() / n;
    let variance: Decimal = daily_pnl.values().map(|r| (*r - mean) * (*r - mean)).sum::<Decimal>() / n;
    if variance.is_zero() {
        return None;
    }
    let std_dev = variance.sqrt()?;
    Some(mean / std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_bus::payload::SignalAction;
    use rust_decimal_macros::dec;

    fn signal(symbol: Symbol, strategy: &str, ts: DateTime<Utc>) -> TradingSignal {
        TradingSignal {
            strategy_name: StrategyId::new(strategy),
            symbol,
            action: SignalAction::Buy,
            confidence: dec!(0.5),
            suggested_price: Some(dec!(75000)),
            reason: "test".to_string(),
            ts,
            liquidation: false,
            source: strategy.to_string(),
        }
    }

    fn position_update(symbol: Symbol, realized_pnl: Decimal, ts: DateTime<Utc>) -> PositionUpdated {
        PositionUpdated {
            symbol,
            qty: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            realized_pnl,
            unrealized_pnl: Decimal::ZERO,
            last_mark_price: dec!(75000),
            ts,
        }
    }

    #[test]
    fn attributes_realized_pnl_delta_to_the_last_signaling_strategy() {
        let tracker = PerformanceTracker::new();
        let symbol = Symbol::new("005930").unwrap();
        let t0 = Utc::now();

        tracker.note_signal(&signal(symbol.clone(), "ma_1m_5m", t0));
        tracker.note_position_update(&position_update(symbol.clone(), dec!(10000), t0));
        tracker.note_position_update(&position_update(symbol, dec!(25000), t0 + chrono::Duration::minutes(1)));

        let metrics = tracker.metrics(&StrategyId::new("ma_1m_5m")).unwrap();
        assert_eq!(metrics.trade_count, 2);
        assert_eq!(metrics.total_return, dec!(25000));
        assert_eq!(metrics.win_rate, Decimal::ONE);
    }

    #[test]
    fn unknown_strategy_has_no_metrics() {
        let tracker = PerformanceTracker::new();
        assert!(tracker.metrics(&StrategyId::new("ghost")).is_none());
    }
}
