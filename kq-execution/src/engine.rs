//! Order Engine composition root (spec.md §4.H). Grounded on
//! `kq-risk::engine::RiskEngine`'s shape: a synchronous-decision core plus
//! a handful of background loops sharing one bus/cache, `spawn()`-started
//! for the engine's lifetime.

use crate::broker::{PlaceAck, SharedBrokerClient};
use crate::commission;
use crate::config::ExecutionConfig;
use crate::error::ExecutionError;
use crate::order::{Fill, Order, OrderState};
use crate::position::PositionBook;
use crate::queue::PriorityQueue;
use crate::rate_limit::{Priority, RateLimiter};
use crate::tracker::{ExecutionTracker, FillOutcome};
use chrono::Utc;
use dashmap::DashMap;
use kq_bus::payload::{
    BusMessage, MarketDataReceived, OrderCancelled, OrderFailed, OrderFullyExecuted, OrderPartiallyExecuted, OrderPlaced, PositionUpdated,
    RiskCheckRequest, RiskDecision, SignalAction, SystemStatus, SystemStatusKind, TradingSignal,
};
use kq_bus::{EventBus, Topic, DEFAULT_RISK_CHECK_TIMEOUT};
use kq_cache::{InMemoryCache, OrderSnapshot};
use kq_instrument::{OrderId, OrderType, Side, StrategyId, Symbol};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// How often the expiry sweep and partial-fill watchdog loops tick.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

pub struct OrderEngine {
    bus: Arc<EventBus>,
    cache: Arc<InMemoryCache>,
    broker: SharedBrokerClient,
    config: ExecutionConfig,
    queue: PriorityQueue,
    rate_limiter: RateLimiter,
    tracker: ExecutionTracker,
    positions: PositionBook,
    orders: DashMap<OrderId, Order>,
    semaphore: Arc<Semaphore>,
    partial_fill_alerted: DashMap<OrderId, ()>,
}

impl OrderEngine {
    pub fn new(bus: Arc<EventBus>, cache: Arc<InMemoryCache>, broker: SharedBrokerClient, config: ExecutionConfig) -> Arc<Self> {
        let queue = PriorityQueue::new(config.strategy_priority_overrides.clone(), config.priority_timeout());
        let rate_limiter = RateLimiter::per_second(config.broker_rate_limit_rps);
        let tracker = ExecutionTracker::new(config.max_fills_per_order, config.max_partial_fill_time());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_submissions));
        Arc::new(Self {
            bus,
            cache,
            broker,
            config,
            queue,
            rate_limiter,
            tracker,
            positions: PositionBook::new(),
            orders: DashMap::new(),
            semaphore,
            partial_fill_alerted: DashMap::new(),
        })
    }

    pub fn position(&self, symbol: &Symbol) -> Option<crate::position::PositionAccount> {
        self.positions.get(symbol)
    }

    pub fn all_positions(&self) -> Vec<crate::position::PositionAccount> {
        self.positions.all()
    }

    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).map(|e| e.clone())
    }

    fn fail(&self, order_id: Option<OrderId>, symbol: Symbol, strategy_name: StrategyId, reason: String) {
        warn!(?order_id, %symbol, %reason, "order failed");
        self.bus.publish(BusMessage::OrderFailed(OrderFailed { order_id, symbol, strategy_name, reason, ts: Utc::now() }));
    }

    /// spec.md §4.H.1: convert a signal to an order, validate it, run the
    /// synchronous risk check, and (on approval) enqueue it.
    pub async fn on_trading_signal(&self, signal: TradingSignal) {
        let side = match signal.action {
            SignalAction::Buy => Side::Buy,
            SignalAction::Sell => Side::Sell,
            SignalAction::HoldExit => Side::Sell,
        };

        let is_liquidation = signal.liquidation || signal.source == "risk.stop_loss" || signal.action == SignalAction::HoldExit;
        let order_type = if is_liquidation { OrderType::Market } else { OrderType::Limit };

        let quantity = if signal.action == SignalAction::HoldExit {
            match self.positions.get(&signal.symbol) {
                Some(position) if position.qty > Decimal::ZERO => position.qty,
                _ => {
                    info!(symbol = %signal.symbol, "hold_exit signal with no open position, nothing to liquidate");
                    return;
                }
            }
        } else {
            self.config.default_lot_size
        };

        let price = match order_type {
            OrderType::Market => None,
            OrderType::Limit => signal.suggested_price,
        };
        if order_type == OrderType::Limit && price.is_none_or(|p| p <= Decimal::ZERO) {
            self.fail(None, signal.symbol, signal.strategy_name, "limit signal carried no positive suggested_price".to_string());
            return;
        }

        let builder = Order::builder()
            .symbol(signal.symbol.clone())
            .side(side)
            .order_type(order_type)
            .quantity(quantity)
            .price(price)
            .strategy_name(signal.strategy_name.clone())
            .liquidation(is_liquidation);
        let mut order = match builder.build() {
            Ok(order) => order,
            Err(err) => {
                self.fail(None, signal.symbol, signal.strategy_name, err.to_string());
                return;
            }
        };

        let request = RiskCheckRequest {
            correlation_id: Uuid::new_v4(),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            price: order.price.unwrap_or(Decimal::ZERO),
            strategy_name: order.strategy_name.clone(),
            liquidation: order.liquidation,
        };

        let response = match self.bus.risk_check(request, DEFAULT_RISK_CHECK_TIMEOUT).await {
            Ok(response) => response,
            Err(_) => {
                self.fail(Some(order.id), order.symbol, order.strategy_name, "risk_check_unavailable".to_string());
                return;
            }
        };

        match response.decision {
            RiskDecision::Reject => {
                self.fail(Some(order.id), order.symbol, order.strategy_name, response.reasons.join(", "));
                return;
            }
            RiskDecision::Adjust => {
                let adjusted = response.adjusted_quantity.unwrap_or(order.quantity);
                if adjusted < Decimal::ONE {
                    self.fail(Some(order.id), order.symbol, order.strategy_name, "adjusted_quantity_below_one".to_string());
                    return;
                }
                order.quantity = adjusted;
            }
            RiskDecision::Approve => {}
        }

        if let Err(err) = self.queue.enqueue(order.clone()) {
            self.fail(Some(order.id), order.symbol, order.strategy_name, err.to_string());
            return;
        }

        order.transition(OrderState::Queued);
        self.mirror(&order);
        self.orders.insert(order.id, order);
    }

    fn mirror(&self, order: &Order) {
        self.cache.put_order_snapshot(OrderSnapshot {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            price: order.price,
            strategy_name: order.strategy_name.clone(),
            state: order.state.to_string(),
            filled_qty: order.filled_qty,
            created_ts: order.created_ts,
        });
    }

    fn finish(&self, order: &Order) {
        self.cache.remove_order_snapshot(order.id);
        self.queue.clear_in_flight(&order.dedup_key());
        self.tracker.forget(order.id);
        self.partial_fill_alerted.remove(&order.id);
    }

    /// spec.md §4.H.3: submits one queued order to the broker, retrying
    /// retriable failures up to `broker_max_retries` with exponential
    /// backoff before giving up.
    async fn submit_order(self: &Arc<Self>, mut order: Order) {
        self.rate_limiter.acquire(if order.liquidation { Priority::High } else { Priority::Normal }).await;

        let mut attempt = 0;
        let ack: Result<PlaceAck, ExecutionError> = loop {
            attempt += 1;
            match self.broker.place(&order).await {
                Ok(ack) => break Ok(ack),
                Err(err) if err.is_retriable() && attempt < self.config.broker_max_retries => {
                    let delay = Duration::from_millis(self.config.broker_retry_base_delay_ms) * 2u32.pow(attempt - 1);
                    warn!(order_id = %order.id, attempt, %err, "broker place failed, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => break Err(err),
            }
        };

        match ack {
            Ok(ack) => {
                order.broker_order_id = Some(ack.broker_order_id);
                order.transition(OrderState::Submitted);
                self.mirror(&order);
                self.orders.insert(order.id, order.clone());
                self.bus.publish(BusMessage::OrderPlaced(OrderPlaced {
                    order_id: order.id,
                    symbol: order.symbol.clone(),
                    side: order.side,
                    order_type: order.order_type,
                    quantity: order.quantity,
                    price: order.price,
                    strategy_name: order.strategy_name.clone(),
                    ts: Utc::now(),
                }));
            }
            Err(err) => {
                order.transition(OrderState::Failed);
                self.orders.insert(order.id, order.clone());
                self.finish(&order);
                self.fail(Some(order.id), order.symbol.clone(), order.strategy_name.clone(), err.to_string());
            }
        }
    }

    /// spec.md §4.H.4/§4.H.5/§4.H.6: records a broker fill, updates the
    /// order's running totals, charges commission, posts the position
    /// update, and publishes the appropriate lifecycle event.
    pub fn on_fill(&self, order_id: OrderId, qty: Decimal, price: Decimal) {
        let Some(mut order_entry) = self.orders.get_mut(&order_id) else {
            warn!(%order_id, "fill received for unknown order");
            return;
        };
        let commission = commission::calculate_with(order_entry.side, price * qty, &self.config.commission).total();
        let fill = Fill { fill_id: Uuid::new_v4(), order_id, symbol: order_entry.symbol.clone(), side: order_entry.side, qty, price, commission, ts: Utc::now() };

        if self.tracker.record_fill(&mut order_entry, fill.clone()) == FillOutcome::RejectedFillCapExceeded {
            return;
        }

        let position = self.positions.apply_fill(&order_entry.symbol, order_entry.side, fill.qty, fill.price, fill.commission);
        self.bus.publish(BusMessage::PositionUpdated(PositionUpdated {
            symbol: position.symbol,
            qty: position.qty,
            avg_cost: position.avg_cost,
            realized_pnl: position.realized_pnl,
            unrealized_pnl: position.unrealized_pnl,
            last_mark_price: position.last_mark_price,
            ts: position.last_updated,
        }));

        match order_entry.state {
            OrderState::Filled => {
                self.bus.publish(BusMessage::OrderFullyExecuted(OrderFullyExecuted {
                    order_id,
                    symbol: order_entry.symbol.clone(),
                    filled_qty: order_entry.filled_qty,
                    avg_fill_price: order_entry.avg_fill_price,
                    commission_paid: order_entry.commission_paid,
                    ts: Utc::now(),
                }));
                self.mirror(&order_entry);
                self.finish(&order_entry);
            }
            OrderState::Partial => {
                self.bus.publish(BusMessage::OrderPartiallyExecuted(OrderPartiallyExecuted {
                    order_id,
                    symbol: order_entry.symbol.clone(),
                    fill_qty: fill.qty,
                    fill_price: fill.price,
                    filled_qty_total: order_entry.filled_qty,
                    ts: Utc::now(),
                }));
                self.mirror(&order_entry);
            }
            _ => {}
        }
    }

    fn on_market_data(&self, event: &MarketDataReceived) {
        if let Some(position) = self.positions.mark(&event.symbol, event.close) {
            self.bus.publish(BusMessage::PositionUpdated(PositionUpdated {
                symbol: position.symbol,
                qty: position.qty,
                avg_cost: position.avg_cost,
                realized_pnl: position.realized_pnl,
                unrealized_pnl: position.unrealized_pnl,
                last_mark_price: position.last_mark_price,
                ts: position.last_updated,
            }));
        }
    }

    /// spec.md §4.H.3/§4.H.4: polls every live order's broker id for fills
    /// reported since the last poll and applies them via [`Self::on_fill`].
    /// Stands in for the spec's push-style `FillNotification` channel
    /// (§6 "Outbound"), which `BrokerClient` doesn't model directly since
    /// a poll-based query is the lowest common denominator across broker
    /// transports; a push-capable broker implementation can instead feed
    /// fills straight into `on_fill` from its own task.
    async fn poll_fills(&self) {
        let live: Vec<(OrderId, String)> = self
            .orders
            .iter()
            .filter(|e| matches!(e.state, OrderState::Submitted | OrderState::Partial))
            .filter_map(|e| e.broker_order_id.clone().map(|id| (e.id, id)))
            .collect();

        for (order_id, broker_order_id) in live {
            match self.broker.query_fills(&broker_order_id).await {
                Ok(fills) => {
                    for fill in fills {
                        self.on_fill(order_id, fill.qty, fill.price);
                    }
                }
                Err(err) => warn!(%order_id, %err, "query_fills failed"),
            }
        }
    }

    /// Expires orders that sat in the queue past `priority_timeout`
    /// (spec.md §4.H.2).
    fn sweep_expired(&self) {
        for mut order in self.queue.drain_expired(Utc::now()) {
            order.transition(OrderState::Failed);
            self.finish(&order);
            self.fail(Some(order.id), order.symbol.clone(), order.strategy_name.clone(), "expired".to_string());
        }
    }

    /// spec.md §4.H.4: a stalled partial raises `partial_fill_stalled`
    /// once; past 2x the threshold the remainder is cancelled outright.
    async fn check_partial_fill_watchdog(self: &Arc<Self>) {
        let now = Utc::now();
        let stalled: Vec<Order> = self.orders.iter().filter(|e| e.state == OrderState::Partial).map(|e| e.clone()).collect();

        for order in stalled {
            if self.tracker.should_cancel_remainder(&order, now) {
                if let Some(broker_order_id) = &order.broker_order_id {
                    let _ = self.broker.cancel(order.id, broker_order_id).await;
                }
                let mut cancelled = order.clone();
                cancelled.transition(OrderState::Cancelled);
                self.orders.insert(cancelled.id, cancelled.clone());
                self.finish(&cancelled);
                self.bus.publish(BusMessage::OrderCancelled(OrderCancelled {
                    order_id: cancelled.id,
                    symbol: cancelled.symbol,
                    filled_qty: cancelled.filled_qty,
                    reason: "partial_fill_stalled_remainder_cancelled".to_string(),
                    ts: Utc::now(),
                }));
            } else if self.tracker.is_partial_fill_stalled(&order, now) && self.partial_fill_alerted.insert(order.id, ()).is_none() {
                self.bus.publish(BusMessage::SystemStatus(SystemStatus {
                    kind: SystemStatusKind::PartialFillStalled,
                    component: "kq-execution".to_string(),
                    detail: format!("order {} stalled partially filled at {}/{}", order.id, order.filled_qty, order.quantity),
                    ts: now,
                }));
            }
        }
    }

    async fn run_dispatcher(self: Arc<Self>) {
        loop {
            let Some(order) = self.queue.pop() else {
                tokio::time::sleep(Duration::from_millis(25)).await;
                continue;
            };
            let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.queue.requeue(order);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    continue;
                }
            };
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.submit_order(order).await;
                drop(permit);
            });
        }
    }

    /// Subscribes to every bus topic the engine depends on and starts the
    /// dispatcher, expiry sweep, and partial-fill watchdog loops.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let signal_engine = Arc::clone(self);
        self.bus.clone().subscribe_with_handler(Topic::TradingSignal, move |envelope| {
            let engine = Arc::clone(&signal_engine);
            async move {
                if let BusMessage::TradingSignal(signal) = envelope.payload {
                    engine.on_trading_signal(signal).await;
                }
            }
        });

        let market_data_engine = Arc::clone(self);
        self.bus.clone().subscribe_with_handler(Topic::MarketDataReceived, move |envelope| {
            let engine = Arc::clone(&market_data_engine);
            async move {
                if let BusMessage::MarketDataReceived(event) = envelope.payload {
                    engine.on_market_data(&event);
                }
            }
        });

        handles.push(tokio::spawn(Arc::clone(self).run_dispatcher()));

        let sweep_engine = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
            loop {
                interval.tick().await;
                sweep_engine.sweep_expired();
            }
        }));

        let watchdog_engine = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
            loop {
                interval.tick().await;
                watchdog_engine.check_partial_fill_watchdog().await;
            }
        }));

        let fill_poll_engine = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
            loop {
                interval.tick().await;
                fill_poll_engine.poll_fills().await;
            }
        }));

        handles
    }
}
