//! `Order`/`Fill` (spec.md §3) and a builder in the teacher's
//! `FillEventBuilder` / `BuilderIncomplete` style (`src/execution/fill.rs`).

use crate::error::ExecutionError;
use chrono::{DateTime, Utc};
use kq_instrument::{OrderId, OrderType, Side, StrategyId, Symbol, Tif};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `NEW -> QUEUED -> SUBMITTED -> (PARTIAL|FILLED|CANCELLED|REJECTED|FAILED)`
/// (spec.md §3). Terminal: `Filled, Cancelled, Rejected, Failed`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum OrderState {
    New,
    Queued,
    Submitted,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Failed)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderState::New => "New",
            OrderState::Queued => "Queued",
            OrderState::Submitted => "Submitted",
            OrderState::Partial => "Partial",
            OrderState::Filled => "Filled",
            OrderState::Cancelled => "Cancelled",
            OrderState::Rejected => "Rejected",
            OrderState::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// The canonical order record, owned exclusively by the Order Engine
/// (spec.md §3 "Ownership"). Other components read it only via bus
/// lifecycle events or [`crate::engine::OrderEngine::query`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub tif: Tif,
    pub state: OrderState,
    pub filled_qty: Decimal,
    pub avg_fill_price: Decimal,
    pub commission_paid: Decimal,
    pub created_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,
    pub strategy_name: StrategyId,
    /// Set for stop-loss/take-profit-originated liquidation signals;
    /// exempts this order from the `duplicate_in_flight` dedup rule
    /// (DESIGN.md Open Question 2) but not from any other risk rule.
    pub liquidation: bool,
    pub broker_order_id: Option<String>,
}

impl Order {
    pub fn builder() -> OrderBuilder {
        OrderBuilder::default()
    }

    pub fn notional(&self) -> Decimal {
        self.price.unwrap_or(Decimal::ZERO) * self.quantity
    }

    pub fn remaining_qty(&self) -> Decimal {
        (self.quantity - self.filled_qty).max(Decimal::ZERO)
    }

    pub fn dedup_key(&self) -> (Symbol, Side, StrategyId) {
        (self.symbol.clone(), self.side, self.strategy_name.clone())
    }

    pub fn transition(&mut self, next: OrderState) {
        self.state = next;
        self.updated_ts = Utc::now();
    }
}

#[derive(Debug, Default)]
pub struct OrderBuilder {
    symbol: Option<Symbol>,
    side: Option<Side>,
    order_type: Option<OrderType>,
    quantity: Option<Decimal>,
    price: Option<Decimal>,
    tif: Tif,
    strategy_name: Option<StrategyId>,
    liquidation: bool,
}

impl OrderBuilder {
    pub fn symbol(mut self, value: Symbol) -> Self {
        self.symbol = Some(value);
        self
    }

    pub fn side(mut self, value: Side) -> Self {
        self.side = Some(value);
        self
    }

    pub fn order_type(mut self, value: OrderType) -> Self {
        self.order_type = Some(value);
        self
    }

    pub fn quantity(mut self, value: Decimal) -> Self {
        self.quantity = Some(value);
        self
    }

    pub fn price(mut self, value: Option<Decimal>) -> Self {
        self.price = value;
        self
    }

    pub fn tif(mut self, value: Tif) -> Self {
        self.tif = value;
        self
    }

    pub fn strategy_name(mut self, value: StrategyId) -> Self {
        self.strategy_name = Some(value);
        self
    }

    pub fn liquidation(mut self, value: bool) -> Self {
        self.liquidation = value;
        self
    }

    pub fn build(self) -> Result<Order, ExecutionError> {
        let symbol = self.symbol.ok_or(ExecutionError::BuilderIncomplete)?;
        let side = self.side.ok_or(ExecutionError::BuilderIncomplete)?;
        let order_type = self.order_type.ok_or(ExecutionError::BuilderIncomplete)?;
        let quantity = self.quantity.ok_or(ExecutionError::BuilderIncomplete)?;
        let strategy_name = self.strategy_name.ok_or(ExecutionError::BuilderIncomplete)?;
        if order_type == OrderType::Limit && self.price.is_none_or(|p| p <= Decimal::ZERO) {
            return Err(ExecutionError::InvalidOrder("limit order requires price > 0".to_string()));
        }
        if quantity < Decimal::ONE {
            return Err(ExecutionError::InvalidOrder("quantity must be >= 1".to_string()));
        }
        let now = Utc::now();
        Ok(Order {
            id: OrderId::new_random(),
            symbol,
            side,
            order_type,
            quantity,
            price: self.price,
            tif: self.tif,
            state: OrderState::New,
            filled_qty: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            commission_paid: Decimal::ZERO,
            created_ts: now,
            updated_ts: now,
            strategy_name,
            liquidation: self.liquidation,
            broker_order_id: None,
        })
    }
}

/// `{fill_id, order_id, symbol, side, qty, price, commission, ts}`
/// (spec.md §3). Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: uuid::Uuid,
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::new("005930").unwrap()
    }

    #[test]
    fn limit_order_without_a_positive_price_is_rejected() {
        let err = Order::builder()
            .symbol(symbol())
            .side(Side::Buy)
            .order_type(OrderType::Limit)
            .quantity(dec!(10))
            .strategy_name(StrategyId::new("ma_1m_5m"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOrder(_)));
    }

    #[test]
    fn market_order_needs_no_price() {
        let order = Order::builder()
            .symbol(symbol())
            .side(Side::Sell)
            .order_type(OrderType::Market)
            .quantity(dec!(5))
            .strategy_name(StrategyId::new("risk.stop_loss"))
            .liquidation(true)
            .build()
            .unwrap();
        assert_eq!(order.state, OrderState::New);
        assert!(order.price.is_none());
    }

    #[test]
    fn quantity_below_one_is_rejected() {
        let err = Order::builder()
            .symbol(symbol())
            .side(Side::Buy)
            .order_type(OrderType::Market)
            .quantity(dec!(0))
            .strategy_name(StrategyId::new("ma_1m_5m"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOrder(_)));
    }

    #[test]
    fn remaining_qty_floors_at_zero() {
        let mut order = Order::builder()
            .symbol(symbol())
            .side(Side::Buy)
            .order_type(OrderType::Market)
            .quantity(dec!(10))
            .strategy_name(StrategyId::new("ma_1m_5m"))
            .build()
            .unwrap();
        order.filled_qty = dec!(12);
        assert_eq!(order.remaining_qty(), Decimal::ZERO);
    }
}
