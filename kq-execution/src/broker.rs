//! The broker boundary (spec.md §4.H.3, §4.H.4). `BrokerClient` is the
//! seam a real KRX-facing adapter plugs into; [`MockBrokerClient`] is the
//! test double used by `tests/integration.rs`, grounded on the teacher's
//! `jackbot-execution::exchange::mock::MockExchange` test pattern.

use crate::error::ExecutionError;
use crate::order::{Fill, Order};
use async_trait::async_trait;
use chrono::Utc;
use kq_instrument::{OrderId, Side, Symbol};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Returned by a successful [`BrokerClient::place`] call.
#[derive(Debug, Clone)]
pub struct PlaceAck {
    pub broker_order_id: String,
}

/// The Order Engine's only outbound dependency. A real implementation
/// wraps a KRX member broker's FIX/REST/websocket API; nothing upstream
/// of this trait needs to change to support a new broker.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn place(&self, order: &Order) -> Result<PlaceAck, ExecutionError>;
    async fn cancel(&self, order_id: OrderId, broker_order_id: &str) -> Result<(), ExecutionError>;
    /// Fills reported by the broker since the last poll, for brokers
    /// without a push channel. A push-capable broker can return an empty
    /// `Vec` here and feed [`MockBrokerClient::push_fill`]-style events
    /// through its own channel instead.
    async fn query_fills(&self, broker_order_id: &str) -> Result<Vec<Fill>, ExecutionError>;
}

enum Script {
    PartialFills { fills: VecDeque<(Decimal, Decimal)> },
    Reject,
}

struct MockState {
    scripts: HashMap<String, Script>,
    next_id: u64,
    placed: Vec<Order>,
    cancelled: Vec<OrderId>,
    /// `broker_order_id -> (order_id, symbol, side)`, recorded at `place()`
    /// time so a later `query_fills(broker_order_id)` call can look up which
    /// order (and whose scripted fill queue) it is polling for.
    broker_index: HashMap<String, (OrderId, Symbol, Side)>,
}

/// An in-process broker stand-in. By default every order fills fully at
/// its own price; call [`MockBrokerClient::script_partial_fills`] or
/// [`MockBrokerClient::script_reject`] keyed by symbol to exercise other
/// paths.
pub struct MockBrokerClient {
    state: Mutex<MockState>,
}

impl Default for MockBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                scripts: HashMap::new(),
                next_id: 1,
                placed: Vec::new(),
                cancelled: Vec::new(),
                broker_index: HashMap::new(),
            }),
        }
    }

    /// Scripts `symbol` to hand back one `(qty, price)` fill per
    /// `query_fills` poll, in order, until the queue is drained.
    pub fn script_partial_fills(&self, symbol: &str, fills: Vec<(Decimal, Decimal)>) {
        self.state.lock().scripts.insert(symbol.to_string(), Script::PartialFills { fills: fills.into() });
    }

    pub fn script_reject(&self, symbol: &str) {
        self.state.lock().scripts.insert(symbol.to_string(), Script::Reject);
    }

    pub fn placed_orders(&self) -> Vec<Order> {
        self.state.lock().placed.clone()
    }

    pub fn cancelled_orders(&self) -> Vec<OrderId> {
        self.state.lock().cancelled.clone()
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn place(&self, order: &Order) -> Result<PlaceAck, ExecutionError> {
        let mut state = self.state.lock();
        if let Some(Script::Reject) = state.scripts.get(order.symbol.as_str()) {
            return Err(ExecutionError::Broker(format!("mock broker rejected {}", order.symbol)));
        }
        let id = state.next_id;
        state.next_id += 1;
        let broker_order_id = format!("MOCK-{id}");
        state.broker_index.insert(broker_order_id.clone(), (order.id, order.symbol.clone(), order.side));
        state.placed.push(order.clone());
        Ok(PlaceAck { broker_order_id })
    }

    async fn cancel(&self, order_id: OrderId, _broker_order_id: &str) -> Result<(), ExecutionError> {
        self.state.lock().cancelled.push(order_id);
        Ok(())
    }

    /// Hands back the next scripted `(qty, price)` fill for `broker_order_id`'s
    /// symbol, if one was queued via [`Self::script_partial_fills`]. Drains one
    /// fill per call so a test can simulate fills trickling in across several
    /// poll cycles; returns no fills once the queue runs dry.
    async fn query_fills(&self, broker_order_id: &str) -> Result<Vec<Fill>, ExecutionError> {
        let mut state = self.state.lock();
        let Some(&(order_id, ref symbol, side)) = state.broker_index.get(broker_order_id) else {
            return Ok(Vec::new());
        };
        let symbol = symbol.clone();
        let Some(Script::PartialFills { fills }) = state.scripts.get_mut(symbol.as_str()) else {
            return Ok(Vec::new());
        };
        let Some((qty, price)) = fills.pop_front() else {
            return Ok(Vec::new());
        };
        Ok(vec![Fill { fill_id: Uuid::new_v4(), order_id, symbol, side, qty, price, commission: Decimal::ZERO, ts: Utc::now() }])
    }
}

pub type SharedBrokerClient = Arc<dyn BrokerClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use kq_instrument::{OrderType, Side, StrategyId, Symbol};
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::builder()
            .symbol(Symbol::new("005930").unwrap())
            .side(Side::Buy)
            .order_type(OrderType::Market)
            .quantity(dec!(10))
            .strategy_name(StrategyId::new("ma_1m_5m"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn placing_an_order_returns_a_broker_order_id() {
        let broker = MockBrokerClient::new();
        let ack = broker.place(&order()).await.unwrap();
        assert!(ack.broker_order_id.starts_with("MOCK-"));
        assert_eq!(broker.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn a_scripted_reject_fails_the_place_call() {
        let broker = MockBrokerClient::new();
        broker.script_reject("005930");
        assert!(broker.place(&order()).await.is_err());
    }

    #[tokio::test]
    async fn cancel_records_the_order_id() {
        let broker = MockBrokerClient::new();
        let o = order();
        broker.cancel(o.id, "MOCK-1").await.unwrap();
        assert_eq!(broker.cancelled_orders(), vec![o.id]);
    }

    #[tokio::test]
    async fn query_fills_drains_the_scripted_partial_fills_one_poll_at_a_time() {
        let broker = MockBrokerClient::new();
        broker.script_partial_fills("005930", vec![(dec!(4), dec!(74_000)), (dec!(6), dec!(74_100))]);
        let ack = broker.place(&order()).await.unwrap();

        let first = broker.query_fills(&ack.broker_order_id).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].qty, dec!(4));
        assert_eq!(first[0].price, dec!(74_000));

        let second = broker.query_fills(&ack.broker_order_id).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].qty, dec!(6));

        let third = broker.query_fills(&ack.broker_order_id).await.unwrap();
        assert!(third.is_empty(), "scripted queue should be drained after both fills are polled");
    }

    #[tokio::test]
    async fn query_fills_for_an_unscripted_symbol_reports_nothing() {
        let broker = MockBrokerClient::new();
        let ack = broker.place(&order()).await.unwrap();
        assert!(broker.query_fills(&ack.broker_order_id).await.unwrap().is_empty());
    }
}
