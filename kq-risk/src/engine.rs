//! Wires the synchronous rule chain (spec.md §4.G.1) to the bus's
//! `risk_check` request/response path, and the async monitors (spec.md
//! §4.G.2) to their bus subscriptions. Grounded on `src/engine/trader.rs`'s
//! event-loop shape, replacing direct ownership of positions (the
//! teacher's `Arc<Mutex<Portfolio>>`) with read-only reads of the KV
//! cache's `positions:{symbol}` keyspace that the Order Engine owns —
//! one-way ownership via the bus, per spec.md §9 redesign note on cyclic
//! `OrderEngine`/`RiskEngine` ownership.

use crate::config::RiskConfig;
use crate::context::{IntendedOrder, RiskContext};
use crate::emergency::{ArmTrigger, EmergencyStop};
use crate::monitor::PortfolioRiskMonitor;
use crate::rules::{Decision, RiskRuleChain};
use crate::stop_loss::StopLossMonitor;
use chrono::{Datelike, Utc};
use kq_bus::payload::{
    BusMessage, MarketDataReceived, OrderFailed, OrderPlaced, PositionUpdated, RiskCheckRequest, RiskCheckResponse, RiskDecision, TradingSignal,
};
use kq_bus::{EventBus, Topic};
use kq_cache::InMemoryCache;
use kq_instrument::Symbol;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

struct DailyCounters {
    day: chrono::NaiveDate,
    month: u32,
    year: i32,
    orders_today: u32,
    realized_pnl_today: Decimal,
    realized_pnl_month: Decimal,
}

impl DailyCounters {
    fn new_for(now: chrono::DateTime<Utc>) -> Self {
        let date = now.date_naive();
        Self { day: date, month: date.month(), year: date.year(), orders_today: 0, realized_pnl_today: Decimal::ZERO, realized_pnl_month: Decimal::ZERO }
    }

    fn roll(&mut self, now: chrono::DateTime<Utc>) {
        let date = now.date_naive();
        if date != self.day {
            self.orders_today = 0;
            self.realized_pnl_today = Decimal::ZERO;
            self.day = date;
        }
        if date.month() != self.month || date.year() != self.year {
            self.realized_pnl_month = Decimal::ZERO;
            self.month = date.month();
            self.year = date.year();
        }
    }
}

/// Risk Engine composition root (spec.md §4.G): the synchronous rule
/// chain plus its dependent async monitors, all sharing one read-only
/// view of the cache and one emergency-stop flag.
pub struct RiskEngine {
    bus: Arc<EventBus>,
    cache: Arc<InMemoryCache>,
    config: RiskConfig,
    chain: RiskRuleChain,
    emergency: Arc<EmergencyStop>,
    pub stop_loss: Arc<StopLossMonitor>,
    pub portfolio_monitor: Arc<PortfolioRiskMonitor>,
    counters: Mutex<DailyCounters>,
    consecutive_losses: AtomicU32,
    cash: Mutex<Decimal>,
    last_realized_pnl_by_symbol: Mutex<HashMap<Symbol, Decimal>>,
}

impl RiskEngine {
    pub fn new(bus: Arc<EventBus>, cache: Arc<InMemoryCache>, config: RiskConfig) -> Arc<Self> {
        let emergency = Arc::new(EmergencyStop::new(config.emergency.clone()));
        let stop_loss = Arc::new(StopLossMonitor::new(&config));
        let portfolio_monitor = Arc::new(PortfolioRiskMonitor::new(
            Arc::clone(&cache),
            Arc::clone(&bus),
            config.monitor.clone(),
            config.sector_map.clone(),
        ));
        let chain = RiskRuleChain::from_config(&config);
        Arc::new(Self {
            bus,
            cache,
            config,
            chain,
            emergency,
            stop_loss,
            portfolio_monitor,
            counters: Mutex::new(DailyCounters::new_for(Utc::now())),
            consecutive_losses: AtomicU32::new(0),
            cash: Mutex::new(Decimal::ZERO),
            last_realized_pnl_by_symbol: Mutex::new(HashMap::new()),
        })
    }

    pub fn emergency_stop(&self) -> &Arc<EmergencyStop> {
        &self.emergency
    }

    pub fn set_cash(&self, cash: Decimal) {
        *self.cash.lock() = cash;
        self.portfolio_monitor.set_cash(cash);
    }

    /// Builds the [`RiskContext`] for one intended order from the cache's
    /// positions and this engine's own counters. Returns `None` (mapped by
    /// the caller to `context_unavailable`) only if a market price is
    /// needed and missing — every other field degrades to zero/empty
    /// rather than failing, since an untraded symbol legitimately has no
    /// existing exposure.
    fn build_context(&self, request: &RiskCheckRequest) -> Option<(IntendedOrder, RiskContext)> {
        let price = if request.price.is_zero() {
            self.cache.get_market_snapshot(&request.symbol)?.close
        } else {
            request.price
        };
        if price.is_zero() {
            return None;
        }

        let order = IntendedOrder {
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price,
            strategy_name: request.strategy_name.clone(),
            liquidation: request.liquidation,
        };

        let positions = self.cache.all_positions();
        let existing_notional_for_symbol = positions
            .iter()
            .find(|p| p.symbol == request.symbol)
            .map(|p| (p.qty * p.last_mark_price).abs())
            .unwrap_or(Decimal::ZERO);

        let sector = self.config.sector_map.get(&request.symbol).cloned();
        let existing_notional_for_sector = sector
            .as_ref()
            .map(|sector| {
                positions
                    .iter()
                    .filter(|p| self.config.sector_map.get(&p.symbol) == Some(sector))
                    .map(|p| (p.qty * p.last_mark_price).abs())
                    .sum()
            })
            .unwrap_or(Decimal::ZERO);

        let total_notional: Decimal = positions.iter().map(|p| (p.qty * p.last_mark_price).abs()).sum();
        let cash = *self.cash.lock();
        let portfolio_value = cash + positions.iter().map(|p| p.qty * p.last_mark_price).sum::<Decimal>();

        let counters = self.counters.lock();
        let ctx = RiskContext {
            portfolio_value,
            cash,
            sector,
            existing_notional_for_symbol,
            existing_notional_for_sector,
            total_notional,
            realized_pnl_today: counters.realized_pnl_today,
            realized_pnl_month: counters.realized_pnl_month,
            orders_today: counters.orders_today,
            consecutive_losing_trades: self.consecutive_losses.load(Ordering::Acquire),
            emergency_stop_armed: self.emergency.is_armed(),
        };
        Some((order, ctx))
    }

    /// Handles one `risk_check` request end-to-end: builds context,
    /// evaluates the chain, and returns the response the bus will deliver
    /// back to the waiting caller (spec.md §4.G.1).
    pub fn handle_risk_check(&self, request: RiskCheckRequest) -> RiskCheckResponse {
        let Some((order, ctx)) = self.build_context(&request) else {
            return RiskCheckResponse {
                correlation_id: request.correlation_id,
                decision: RiskDecision::Reject,
                adjusted_quantity: None,
                reasons: vec!["context_unavailable".to_string()],
            };
        };

        let result = self.chain.evaluate(&order, &ctx);
        RiskCheckResponse {
            correlation_id: request.correlation_id,
            decision: match result.decision {
                Decision::Approve => RiskDecision::Approve,
                Decision::Adjust => RiskDecision::Adjust,
                Decision::Reject => RiskDecision::Reject,
            },
            adjusted_quantity: result.adjusted_quantity,
            reasons: result.reasons,
        }
    }

    fn on_order_placed(&self, _event: &OrderPlaced) {
        let mut counters = self.counters.lock();
        counters.roll(Utc::now());
        counters.orders_today += 1;
    }

    /// Feeds the emergency stop's rolling error-rate counter (spec.md
    /// §4.G.2 "unusually high error rate"). Every `order_failed` on the
    /// bus — broker rejects, timeouts, expiries — counts as one error.
    fn on_order_failed(&self, _event: &OrderFailed) {
        self.emergency.note_error();
    }

    /// Updates realized P&L aggregates and the consecutive-loss streak
    /// when a position closes (qty returns to zero). Also arms the
    /// emergency stop on a daily-loss breach or a consecutive-loss streak,
    /// independent of whatever the next `risk_check` call would reject
    /// (spec.md §4.G.2: the monitor is the thing that arms the flag; the
    /// rule chain only reads it).
    fn on_position_updated(&self, event: &PositionUpdated) {
        self.emergency.note_position_valuation();

        let mut last_by_symbol = self.last_realized_pnl_by_symbol.lock();
        let previous = last_by_symbol.get(&event.symbol).copied().unwrap_or(Decimal::ZERO);
        let delta = event.realized_pnl - previous;
        last_by_symbol.insert(event.symbol.clone(), event.realized_pnl);
        drop(last_by_symbol);

        if event.qty.is_zero() && !delta.is_zero() {
            let mut counters = self.counters.lock();
            counters.roll(Utc::now());
            counters.realized_pnl_today += delta;
            counters.realized_pnl_month += delta;
            let (daily, max_daily) = (counters.realized_pnl_today, self.config.max_daily_loss);
            drop(counters);

            if delta < Decimal::ZERO {
                self.consecutive_losses.fetch_add(1, Ordering::AcqRel);
            } else {
                self.consecutive_losses.store(0, Ordering::Release);
            }

            if daily <= -max_daily {
                self.emergency.arm(ArmTrigger::DailyLossLimitExceeded);
            }
            if self.consecutive_losses.load(Ordering::Acquire) >= self.config.emergency.max_consecutive_losses {
                self.emergency.arm(ArmTrigger::ConsecutiveLosses);
            }
        }
    }

    fn on_market_data(&self, event: &MarketDataReceived) -> Option<TradingSignal> {
        self.stop_loss.on_market_data(event)
    }

    /// Subscribes to every bus topic the engine depends on and starts the
    /// periodic portfolio monitor. Returns once subscriptions are live;
    /// the returned handles keep running for the engine's lifetime.
    pub fn spawn(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let risk_check_engine = Arc::clone(self);
        let mut requests = self.bus.subscribe_risk_check_requests();
        let bus_for_replies = Arc::clone(&self.bus);
        handles.push(tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(request) => {
                        let response = risk_check_engine.handle_risk_check(request);
                        bus_for_replies.reply_risk_check(response);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let order_placed_engine = Arc::clone(self);
        self.bus.clone().subscribe_with_handler(Topic::OrderPlaced, move |envelope| {
            let engine = Arc::clone(&order_placed_engine);
            async move {
                if let BusMessage::OrderPlaced(event) = envelope.payload {
                    engine.on_order_placed(&event);
                }
            }
        });

        let position_engine = Arc::clone(self);
        self.bus.clone().subscribe_with_handler(Topic::PositionUpdated, move |envelope| {
            let engine = Arc::clone(&position_engine);
            async move {
                if let BusMessage::PositionUpdated(event) = envelope.payload {
                    engine.stop_loss.on_position_updated(&event);
                    engine.on_position_updated(&event);
                }
            }
        });

        let market_data_engine = Arc::clone(self);
        let bus_for_signals = Arc::clone(&self.bus);
        self.bus.clone().subscribe_with_handler(Topic::MarketDataReceived, move |envelope| {
            let engine = Arc::clone(&market_data_engine);
            let bus = Arc::clone(&bus_for_signals);
            async move {
                if let BusMessage::MarketDataReceived(event) = envelope.payload {
                    if let Some(signal) = engine.on_market_data(&event) {
                        info!(symbol = %signal.symbol, reason = %signal.reason, "stop-loss monitor emitting liquidation signal");
                        bus.publish(BusMessage::TradingSignal(signal));
                    }
                }
            }
        });

        let order_failed_engine = Arc::clone(self);
        self.bus.clone().subscribe_with_handler(Topic::OrderFailed, move |envelope| {
            let engine = Arc::clone(&order_failed_engine);
            async move {
                if let BusMessage::OrderFailed(event) = envelope.payload {
                    engine.on_order_failed(&event);
                }
            }
        });

        handles.push(Arc::clone(&self.portfolio_monitor).spawn());

        let emergency = Arc::clone(&self.emergency);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
            loop {
                interval.tick().await;
                emergency.check_staleness();
            }
        }));

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_bus::payload::RiskDecision;
    use kq_instrument::{OrderType, Side, StrategyId};
    use rust_decimal_macros::dec;

    fn engine() -> Arc<RiskEngine> {
        let bus = EventBus::new("kq-risk-test", 16);
        let cache = Arc::new(InMemoryCache::with_default_budget(200));
        let engine = RiskEngine::new(bus, cache, RiskConfig::default());
        engine.set_cash(dec!(10_000_000));
        engine
    }

    fn request(quantity: Decimal, price: Decimal) -> RiskCheckRequest {
        RiskCheckRequest {
            correlation_id: uuid::Uuid::new_v4(),
            symbol: Symbol::new("005930").unwrap(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity,
            price,
            strategy_name: StrategyId::new("ma_1m_5m"),
            liquidation: false,
        }
    }

    #[test]
    fn a_within_limits_order_is_approved() {
        let engine = engine();
        let response = engine.handle_risk_check(request(dec!(10), dec!(75_000)));
        assert_eq!(response.decision, RiskDecision::Approve);
    }

    #[test]
    fn market_order_with_zero_price_falls_back_to_the_cached_market_snapshot() {
        let engine = engine();
        engine.cache.put_market_snapshot(kq_cache::MarketSnapshot {
            symbol: Symbol::new("005930").unwrap(),
            ts: chrono::Utc::now(),
            open: dec!(75_000),
            high: dec!(75_000),
            low: dec!(75_000),
            close: dec!(75_000),
            volume: dec!(1000),
            source: "krx_ws".to_string(),
        });
        let mut req = request(dec!(10), Decimal::ZERO);
        req.order_type = OrderType::Market;
        let response = engine.handle_risk_check(req);
        assert_eq!(response.decision, RiskDecision::Approve);
    }

    #[test]
    fn missing_price_with_no_cached_snapshot_is_context_unavailable() {
        let engine = engine();
        let response = engine.handle_risk_check(request(dec!(10), Decimal::ZERO));
        assert_eq!(response.decision, RiskDecision::Reject);
        assert_eq!(response.reasons, vec!["context_unavailable".to_string()]);
    }

    #[test]
    fn a_closed_losing_position_increments_the_consecutive_loss_counter_and_daily_pnl() {
        let engine = engine();
        let symbol = Symbol::new("005930").unwrap();
        engine.on_position_updated(&PositionUpdated {
            symbol: symbol.clone(),
            qty: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            realized_pnl: -dec!(10_000),
            unrealized_pnl: Decimal::ZERO,
            last_mark_price: dec!(74_000),
            ts: chrono::Utc::now(),
        });
        assert_eq!(engine.consecutive_losses.load(Ordering::Acquire), 1);
        assert_eq!(engine.counters.lock().realized_pnl_today, -dec!(10_000));
    }

    #[test]
    fn a_burst_of_order_failed_events_arms_the_emergency_stop_on_error_rate() {
        let bus = EventBus::new("kq-risk-test", 16);
        let cache = Arc::new(InMemoryCache::with_default_budget(200));
        let mut config = RiskConfig::default();
        config.emergency.max_error_rate_per_min = 3;
        let engine = RiskEngine::new(bus, cache, config);
        engine.set_cash(dec!(10_000_000));

        let symbol = Symbol::new("005930").unwrap();
        let failed = |reason: &str| OrderFailed {
            order_id: None,
            symbol: symbol.clone(),
            strategy_name: StrategyId::new("ma_1m_5m"),
            reason: reason.to_string(),
            ts: chrono::Utc::now(),
        };

        for _ in 0..3 {
            engine.on_order_failed(&failed("broker_timeout"));
            assert!(!engine.emergency.is_armed());
        }
        engine.on_order_failed(&failed("broker_timeout"));
        assert!(engine.emergency.is_armed());
    }

    #[test]
    fn daily_loss_breach_arms_the_emergency_stop() {
        let engine = engine();
        let symbol = Symbol::new("005930").unwrap();
        engine.on_position_updated(&PositionUpdated {
            symbol,
            qty: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            realized_pnl: -dec!(500_001),
            unrealized_pnl: Decimal::ZERO,
            last_mark_price: dec!(74_000),
            ts: chrono::Utc::now(),
        });
        assert!(engine.emergency.is_armed());
        let response = engine.handle_risk_check(request(dec!(1), dec!(75_000)));
        assert_eq!(response.decision, RiskDecision::Reject);
    }
}
