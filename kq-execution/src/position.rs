//! Position and P&L accounting (spec.md §4.H.5, §3 `Position` entity).
//! Grounded on `src/portfolio/portfolio.rs`'s `update_from_fill` /
//! `src/portfolio/position.rs`'s enter/update/exit shape, rewritten in
//! `Decimal` instead of `f64` and against the Order Engine's own fill
//! stream rather than a `FillEvent` bus message, since positions here are
//! owned and computed by the Order Engine itself (spec.md §3 "Ownership").

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kq_instrument::{Side, Symbol};
use rust_decimal::Decimal;

/// One symbol's running position. `qty == 0` is retained for history
/// (spec.md §3: "qty = 0 is allowed and retained... may be garbage-
/// collected after a grace window") rather than removed on every flat.
#[derive(Debug, Clone)]
pub struct PositionAccount {
    pub symbol: Symbol,
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_mark_price: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl PositionAccount {
    fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            qty: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_mark_price: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }
}

/// Owns every symbol's [`PositionAccount`]. Exclusively written by the
/// Order Engine; every other component reads positions via the
/// `position_updated` bus event or the cache's read-only `positions:*`
/// keyspace (spec.md §5 shared-resource policy).
#[derive(Default)]
pub struct PositionBook {
    accounts: DashMap<Symbol, PositionAccount>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self { accounts: DashMap::new() }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<PositionAccount> {
        self.accounts.get(symbol).map(|e| e.clone())
    }

    pub fn all(&self) -> Vec<PositionAccount> {
        self.accounts.iter().map(|e| e.clone()).collect()
    }

    /// Applies one fill's effect on its symbol's position (spec.md
    /// §4.H.5) and returns the updated snapshot to publish.
    ///
    /// Buys: `avg_cost = (old_qty*old_avg + fill_qty*fill_price + commission) / (old_qty + fill_qty)`.
    /// Sells: `realized_pnl += (fill_price - avg_cost)*fill_qty - commission`;
    /// `avg_cost` is left unchanged until `qty` returns to zero, at which
    /// point it resets to zero (spec.md §8 invariant 2: `avg_cost > 0`
    /// only while `qty > 0`).
    pub fn apply_fill(&self, symbol: &Symbol, side: Side, fill_qty: Decimal, fill_price: Decimal, commission: Decimal) -> PositionAccount {
        let mut entry = self.accounts.entry(symbol.clone()).or_insert_with(|| PositionAccount::flat(symbol.clone()));

        match side {
            Side::Buy => {
                let old_qty = entry.qty;
                let old_avg = entry.avg_cost;
                let new_qty = old_qty + fill_qty;
                entry.avg_cost = if new_qty.is_zero() {
                    Decimal::ZERO
                } else {
                    (old_qty * old_avg + fill_qty * fill_price + commission) / new_qty
                };
                entry.qty = new_qty;
            }
            Side::Sell => {
                entry.realized_pnl += (fill_price - entry.avg_cost) * fill_qty - commission;
                entry.qty -= fill_qty;
                if entry.qty.is_zero() {
                    entry.avg_cost = Decimal::ZERO;
                }
            }
        }
        entry.last_mark_price = fill_price;
        entry.last_updated = Utc::now();
        entry.clone()
    }

    /// Recomputes unrealized P&L against the latest close (spec.md
    /// §4.H.5: "recomputed on each `market_data_received`"). Returns
    /// `None` if the symbol has no position on record yet.
    pub fn mark(&self, symbol: &Symbol, close: Decimal) -> Option<PositionAccount> {
        let mut entry = self.accounts.get_mut(symbol)?;
        entry.last_mark_price = close;
        entry.unrealized_pnl = (close - entry.avg_cost) * entry.qty;
        entry.last_updated = Utc::now();
        Some(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::new("005930").unwrap()
    }

    #[test]
    fn a_buy_sets_avg_cost_including_commission() {
        let book = PositionBook::new();
        let position = book.apply_fill(&symbol(), Side::Buy, dec!(10), dec!(75_100), dec!(1_130));
        // (0*0 + 10*75_100 + 1130) / 10 = 75_213
        assert_eq!(position.avg_cost, dec!(75_213));
        assert_eq!(position.qty, dec!(10));
    }

    #[test]
    fn a_sell_realizes_pnl_against_avg_cost_and_leaves_it_unchanged_until_flat() {
        let book = PositionBook::new();
        book.apply_fill(&symbol(), Side::Buy, dec!(10), dec!(75_000), dec!(0));
        let position = book.apply_fill(&symbol(), Side::Sell, dec!(4), dec!(76_000), dec!(100));
        // (76_000 - 75_000) * 4 - 100 = 3_900
        assert_eq!(position.realized_pnl, dec!(3_900));
        assert_eq!(position.avg_cost, dec!(75_000));
        assert_eq!(position.qty, dec!(6));
    }

    #[test]
    fn avg_cost_resets_to_zero_once_the_position_returns_to_flat() {
        let book = PositionBook::new();
        book.apply_fill(&symbol(), Side::Buy, dec!(10), dec!(75_000), dec!(0));
        let position = book.apply_fill(&symbol(), Side::Sell, dec!(10), dec!(76_000), dec!(100));
        assert_eq!(position.qty, Decimal::ZERO);
        assert_eq!(position.avg_cost, Decimal::ZERO);
    }

    #[test]
    fn marking_updates_unrealized_pnl_without_touching_realized() {
        let book = PositionBook::new();
        book.apply_fill(&symbol(), Side::Buy, dec!(10), dec!(75_000), dec!(0));
        let position = book.mark(&symbol(), dec!(76_000)).unwrap();
        assert_eq!(position.unrealized_pnl, dec!(10_000));
        assert_eq!(position.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn marking_an_unknown_symbol_is_none() {
        let book = PositionBook::new();
        assert!(book.mark(&symbol(), dec!(76_000)).is_none());
    }
}
