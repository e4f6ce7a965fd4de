//! Cached value types. These are deliberately thin compared to the richer
//! domain types their producers hold (spec.md §3 "Ownership"): the pipeline,
//! analyzer, and order engine convert to these at the cache boundary the
//! same way bus producers convert to [`kq_bus::payload`] DTOs.

use chrono::{DateTime, Utc};
use kq_instrument::{Interval, OrderId, OrderType, Side, StrategyId, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `market:{symbol}`, TTL 24 h.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub source: String,
}

/// One entry in `candles:{symbol}:{interval}`. The ring itself is bounded
/// by [`crate::store::InMemoryCache`] at write time (bounded push + trim).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCandle {
    pub interval: Interval,
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// `indicators:{symbol}:{interval}`, TTL 1 h.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub interval: Interval,
    pub ts: DateTime<Utc>,
    pub candle_close: Decimal,
    pub values: BTreeMap<String, Decimal>,
}

/// `positions:{symbol}`, no TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: Symbol,
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_mark_price: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// Side of `orderbook:{symbol}:{bids|asks}`, TTL 5 min.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Bids,
    Asks,
}

/// One entry of `trades:{symbol}`, bounded list capped at 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ts: DateTime<Utc>,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: kq_instrument::Side,
}

/// `orders:{order_id}`, no TTL. A durable mirror of the order engine's
/// non-terminal priority-queue state (spec.md §4.H.2: "the queue's durable
/// state is mirrored to the KV cache so a crash + restart resumes without
/// losing non-terminal orders"). The order engine is the sole writer of
/// this keyspace; it removes the entry once an order reaches a terminal
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub strategy_name: StrategyId,
    pub state: String,
    pub filled_qty: Decimal,
    pub created_ts: DateTime<Utc>,
}
