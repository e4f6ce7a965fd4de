//! Auto stop-loss/take-profit monitor (spec.md §4.G.2). Tracks fixed,
//! trailing, and break-even stop levels concurrently per open position —
//! whichever level is tightest governs, since a breach of any one is a
//! legitimate reason to exit. Grounded directly on
//! `jackbot/src/smart_trade/{multi_level_stop.rs, trailing_take_profit.rs}`'s
//! "track a running extreme, compare against an offset" shape, generalized
//! from a single signal type to the three named modes.

use crate::config::RiskConfig;
use dashmap::DashMap;
use kq_bus::payload::{MarketDataReceived, PositionUpdated, SignalAction, TradingSignal};
use kq_instrument::{StrategyId, Symbol};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
struct PositionStopState {
    entry_price: Decimal,
    qty: Decimal,
    highest_mark: Decimal,
    break_even_armed: bool,
}

/// Owns one [`PositionStopState`] per open position; consumes
/// `market_data_received` and `position_updated` to evaluate and clear
/// state (spec.md §3: per-strategy/per-monitor state is never shared).
pub struct StopLossMonitor {
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
    trailing_offset_pct: Decimal,
    break_even_profit_pct: Decimal,
    state: DashMap<Symbol, PositionStopState>,
}

impl StopLossMonitor {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
            trailing_offset_pct: config.trailing_offset_pct,
            break_even_profit_pct: config.break_even_profit_pct,
            state: DashMap::new(),
        }
    }

    pub fn on_position_updated(&self, update: &PositionUpdated) {
        if update.qty.is_zero() {
            self.state.remove(&update.symbol);
            return;
        }
        self.state
            .entry(update.symbol.clone())
            .and_modify(|s| {
                s.entry_price = update.avg_cost;
                s.qty = update.qty;
            })
            .or_insert(PositionStopState {
                entry_price: update.avg_cost,
                qty: update.qty,
                highest_mark: update.last_mark_price,
                break_even_armed: false,
            });
    }

    /// Returns a liquidation `trading_signal` if the tick breaches any
    /// active stop level for a held position.
    pub fn on_market_data(&self, tick: &MarketDataReceived) -> Option<TradingSignal> {
        let mut entry = self.state.get_mut(&tick.symbol)?;
        if entry.qty.is_zero() || entry.entry_price.is_zero() {
            return None;
        }
        let price = tick.close;
        if price > entry.highest_mark {
            entry.highest_mark = price;
        }

        let profit_pct = (price - entry.entry_price) / entry.entry_price;
        if !entry.break_even_armed && profit_pct >= self.break_even_profit_pct {
            entry.break_even_armed = true;
        }

        let fixed_stop = entry.entry_price * (Decimal::ONE - self.stop_loss_pct);
        let trailing_stop = entry.highest_mark * (Decimal::ONE - self.trailing_offset_pct);
        let mut effective_stop = fixed_stop.max(trailing_stop);
        if entry.break_even_armed {
            effective_stop = effective_stop.max(entry.entry_price);
        }

        let take_profit = entry.entry_price * (Decimal::ONE + self.take_profit_pct);
        let qty = entry.qty;

        if price <= effective_stop {
            drop(entry);
            self.state.remove(&tick.symbol);
            return Some(Self::liquidation_signal(tick, qty, "stop_loss_triggered"));
        }
        if price >= take_profit {
            drop(entry);
            self.state.remove(&tick.symbol);
            return Some(Self::liquidation_signal(tick, qty, "take_profit_triggered"));
        }
        None
    }

    fn liquidation_signal(tick: &MarketDataReceived, qty: Decimal, reason: &str) -> TradingSignal {
        TradingSignal {
            strategy_name: StrategyId::new("risk.stop_loss"),
            symbol: tick.symbol.clone(),
            action: SignalAction::Sell,
            confidence: Decimal::ONE,
            suggested_price: Some(tick.close),
            reason: format!("{reason} qty={qty}"),
            ts: tick.ts,
            liquidation: true,
            source: "risk.stop_loss".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(symbol: Symbol, qty: Decimal, avg_cost: Decimal, mark: Decimal) -> PositionUpdated {
        PositionUpdated {
            symbol,
            qty,
            avg_cost,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_mark_price: mark,
            ts: chrono::Utc::now(),
        }
    }

    fn tick(symbol: Symbol, close: Decimal) -> MarketDataReceived {
        MarketDataReceived { symbol, ts: chrono::Utc::now(), close, volume: dec!(1000) }
    }

    #[test]
    fn fixed_stop_loss_triggers_below_entry_minus_pct() {
        let monitor = StopLossMonitor::new(&RiskConfig::default());
        let symbol = Symbol::new("005930").unwrap();
        monitor.on_position_updated(&position(symbol.clone(), dec!(10), dec!(75_000), dec!(75_000)));

        // stop_loss_pct default 0.03 -> stop at 72_750.
        assert!(monitor.on_market_data(&tick(symbol.clone(), dec!(74_000))).is_none());
        let signal = monitor.on_market_data(&tick(symbol, dec!(72_000))).expect("stop triggered");
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.liquidation);
    }

    #[test]
    fn take_profit_triggers_above_entry_plus_pct() {
        let monitor = StopLossMonitor::new(&RiskConfig::default());
        let symbol = Symbol::new("005930").unwrap();
        monitor.on_position_updated(&position(symbol.clone(), dec!(10), dec!(75_000), dec!(75_000)));

        // take_profit_pct default 0.06 -> take at 79_500.
        let signal = monitor.on_market_data(&tick(symbol, dec!(80_000))).expect("take profit triggered");
        assert_eq!(signal.reason.contains("take_profit"), true);
    }

    #[test]
    fn closing_a_position_clears_its_stop_state() {
        let monitor = StopLossMonitor::new(&RiskConfig::default());
        let symbol = Symbol::new("005930").unwrap();
        monitor.on_position_updated(&position(symbol.clone(), dec!(10), dec!(75_000), dec!(75_000)));
        monitor.on_position_updated(&position(symbol.clone(), Decimal::ZERO, dec!(75_000), dec!(75_000)));
        assert!(monitor.on_market_data(&tick(symbol, dec!(1))).is_none());
    }
}
