//! Fill accumulation and the partial-fill watchdog (spec.md §4.H.4).
//! Grounded on the teacher's `MetaPortfolio::update_from_fill` running-
//! average idiom (`src/portfolio/portfolio.rs`), adapted to accumulate
//! fills onto an `Order` instead of a `Position` and to add the spec's
//! stall/cap safeguards, which the teacher has no equivalent of.

use crate::order::{Fill, Order, OrderState};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kq_instrument::OrderId;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::warn;

/// Default `max_partial_fill_time` (spec.md §4.H.4, §6).
pub const DEFAULT_MAX_PARTIAL_FILL_TIME: Duration = Duration::from_secs(300);
/// Default `max_fills_per_order` (spec.md §4.H.4): a runaway broker
/// sending unbounded micro-fills must not grow memory or accounting
/// state without limit.
pub const DEFAULT_MAX_FILLS_PER_ORDER: usize = 100;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FillOutcome {
    /// The fill was applied; `order.state` reflects the new total.
    Applied,
    /// The fill arrived after `max_fills_per_order` was already reached
    /// for this order. It is logged as an anomaly and excluded from
    /// accounting (DESIGN.md Open Question 1) but the order is not
    /// otherwise affected.
    RejectedFillCapExceeded,
}

struct OrderFillState {
    fill_count: usize,
    last_fill_at: Option<DateTime<Utc>>,
}

/// Tracks per-order fill counts and partial-fill stall timers. Stateless
/// with respect to any one order beyond that bookkeeping — actual fill
/// totals live on the [`Order`] itself.
pub struct ExecutionTracker {
    max_fills_per_order: usize,
    max_partial_fill_time: Duration,
    state: DashMap<OrderId, OrderFillState>,
}

impl ExecutionTracker {
    pub fn new(max_fills_per_order: usize, max_partial_fill_time: Duration) -> Self {
        Self { max_fills_per_order, max_partial_fill_time, state: DashMap::new() }
    }

    /// Applies `fill` onto `order`'s running totals (size-weighted average
    /// fill price, summed commission, `filled_qty`) and advances its
    /// state to `Partial` or `Filled`.
    pub fn record_fill(&self, order: &mut Order, fill: Fill) -> FillOutcome {
        let mut tracked = self.state.entry(order.id).or_insert_with(|| OrderFillState { fill_count: 0, last_fill_at: None });

        if tracked.fill_count >= self.max_fills_per_order {
            warn!(order_id = %order.id, fills = tracked.fill_count, "fill received beyond max_fills_per_order, excluding from accounting");
            return FillOutcome::RejectedFillCapExceeded;
        }
        tracked.fill_count += 1;

        let prior_qty = order.filled_qty;
        let new_qty = prior_qty + fill.qty;
        order.avg_fill_price = if new_qty.is_zero() {
            Decimal::ZERO
        } else {
            (order.avg_fill_price * prior_qty + fill.price * fill.qty) / new_qty
        };
        order.filled_qty = new_qty;
        order.commission_paid += fill.commission;
        tracked.last_fill_at = Some(fill.ts);

        if order.filled_qty >= order.quantity {
            order.transition(OrderState::Filled);
        } else {
            order.transition(OrderState::Partial);
        }

        FillOutcome::Applied
    }

    /// `true` once a `Partial` order has gone longer than
    /// `max_partial_fill_time` since its *last* fill (spec.md §4.H.4: "if
    /// time since last fill on a partially filled order exceeds
    /// `max_partial_fill_time`"). A steady trickle of fills keeps resetting
    /// this clock; only a fill that stops arriving stalls the order.
    pub fn is_partial_fill_stalled(&self, order: &Order, now: DateTime<Utc>) -> bool {
        self.stall_age(order, now).map(|age| age >= self.max_partial_fill_time).unwrap_or(false)
    }

    /// `true` once a stalled partial has gone 2x `max_partial_fill_time`
    /// since its last fill without completing — the remainder should be
    /// cancelled outright.
    pub fn should_cancel_remainder(&self, order: &Order, now: DateTime<Utc>) -> bool {
        self.stall_age(order, now).map(|age| age >= self.max_partial_fill_time * 2).unwrap_or(false)
    }

    fn stall_age(&self, order: &Order, now: DateTime<Utc>) -> Option<Duration> {
        if order.state != OrderState::Partial {
            return None;
        }
        let tracked = self.state.get(&order.id)?;
        let last_fill_at = tracked.last_fill_at?;
        now.signed_duration_since(last_fill_at).to_std().ok()
    }

    /// Drops bookkeeping once an order reaches a terminal state.
    pub fn forget(&self, order_id: OrderId) {
        self.state.remove(&order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_instrument::{OrderType, Side, StrategyId, Symbol};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn order() -> Order {
        Order::builder()
            .symbol(Symbol::new("005930").unwrap())
            .side(Side::Buy)
            .order_type(OrderType::Limit)
            .quantity(dec!(10))
            .price(Some(dec!(75_000)))
            .strategy_name(StrategyId::new("ma_1m_5m"))
            .build()
            .unwrap()
    }

    fn fill(order: &Order, qty: Decimal, price: Decimal) -> Fill {
        Fill { fill_id: Uuid::new_v4(), order_id: order.id, symbol: order.symbol.clone(), side: order.side, qty, price, commission: dec!(0), ts: Utc::now() }
    }

    #[test]
    fn a_partial_fill_weights_the_average_price_and_sets_partial_state() {
        let tracker = ExecutionTracker::new(DEFAULT_MAX_FILLS_PER_ORDER, DEFAULT_MAX_PARTIAL_FILL_TIME);
        let mut o = order();
        let f = fill(&o, dec!(4), dec!(74_000));
        assert_eq!(tracker.record_fill(&mut o, f), FillOutcome::Applied);
        assert_eq!(o.state, OrderState::Partial);
        assert_eq!(o.avg_fill_price, dec!(74_000));
        assert_eq!(o.filled_qty, dec!(4));
    }

    #[test]
    fn filling_the_full_quantity_transitions_to_filled() {
        let tracker = ExecutionTracker::new(DEFAULT_MAX_FILLS_PER_ORDER, DEFAULT_MAX_PARTIAL_FILL_TIME);
        let mut o = order();
        tracker.record_fill(&mut o, fill(&o, dec!(10), dec!(75_000)));
        assert_eq!(o.state, OrderState::Filled);
    }

    #[test]
    fn fills_beyond_the_cap_are_rejected_and_excluded() {
        let tracker = ExecutionTracker::new(1, DEFAULT_MAX_PARTIAL_FILL_TIME);
        let mut o = order();
        assert_eq!(tracker.record_fill(&mut o, fill(&o, dec!(1), dec!(75_000))), FillOutcome::Applied);
        let filled_qty_before = o.filled_qty;
        assert_eq!(tracker.record_fill(&mut o, fill(&o, dec!(1), dec!(75_000))), FillOutcome::RejectedFillCapExceeded);
        assert_eq!(o.filled_qty, filled_qty_before);
    }

    #[test]
    fn a_partial_past_the_threshold_is_reported_stalled() {
        let tracker = ExecutionTracker::new(DEFAULT_MAX_FILLS_PER_ORDER, Duration::from_secs(1));
        let mut o = order();
        let mut f = fill(&o, dec!(4), dec!(74_000));
        f.ts = Utc::now() - chrono::Duration::seconds(5);
        tracker.record_fill(&mut o, f);
        assert!(tracker.is_partial_fill_stalled(&o, Utc::now()));
        assert!(!tracker.should_cancel_remainder(&o, Utc::now()));
    }

    #[test]
    fn a_later_fill_resets_the_stall_clock() {
        let tracker = ExecutionTracker::new(DEFAULT_MAX_FILLS_PER_ORDER, Duration::from_secs(60));
        let mut o = order();
        let mut first = fill(&o, dec!(4), dec!(74_000));
        first.ts = Utc::now() - chrono::Duration::seconds(120);
        tracker.record_fill(&mut o, first);

        let mut second = fill(&o, dec!(2), dec!(74_100));
        second.ts = Utc::now();
        tracker.record_fill(&mut o, second);

        assert!(!tracker.is_partial_fill_stalled(&o, Utc::now()), "a fresh fill should reset the stall clock");
    }

    #[test]
    fn a_partial_past_twice_the_threshold_should_cancel_the_remainder() {
        let tracker = ExecutionTracker::new(DEFAULT_MAX_FILLS_PER_ORDER, Duration::from_secs(1));
        let mut o = order();
        let mut f = fill(&o, dec!(4), dec!(74_000));
        f.ts = Utc::now() - chrono::Duration::seconds(5);
        tracker.record_fill(&mut o, f);
        assert!(tracker.should_cancel_remainder(&o, Utc::now()));
    }
}
