//! Inputs to the synchronous rule chain (spec.md §4.G.1): the order under
//! consideration plus everything the rules need to read, assembled by the
//! engine from the KV cache and its own read-only counters. Risk never
//! writes the order/position keyspaces it reads from (spec.md §5 shared-
//! resource policy).

use kq_instrument::{OrderType, Sector, Side, StrategyId, Symbol};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct IntendedOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub strategy_name: StrategyId,
    pub liquidation: bool,
}

impl IntendedOrder {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }

    pub fn with_quantity(&self, quantity: Decimal) -> Self {
        Self { quantity, ..self.clone() }
    }
}

/// Portfolio/account state at the moment of the check. Built fresh for
/// every `risk_check` call; the engine returns `context_unavailable`
/// rather than constructing one from stale or partial data.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub portfolio_value: Decimal,
    pub cash: Decimal,
    pub sector: Option<Sector>,
    pub existing_notional_for_symbol: Decimal,
    pub existing_notional_for_sector: Decimal,
    pub total_notional: Decimal,
    pub realized_pnl_today: Decimal,
    pub realized_pnl_month: Decimal,
    pub orders_today: u32,
    pub consecutive_losing_trades: u32,
    pub emergency_stop_armed: bool,
}
