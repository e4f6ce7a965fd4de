//! Priority queue (spec.md §4.H.2). Grounded on the teacher's
//! `jackbot-execution::smart_router`/`twap` scheduling idiom, generalized
//! from time-slicing to a `BinaryHeap` ordered by the spec's composite
//! priority key with `created_ts` as the FIFO tie-break.

use crate::error::ExecutionError;
use crate::order::Order;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kq_instrument::{OrderType, Side, StrategyId, Symbol};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

/// Default `priority_timeout` (spec.md §4.H.2, §6 `priority_timeout_s`).
pub const DEFAULT_PRIORITY_TIMEOUT: Duration = Duration::from_secs(300);
/// Default `max_concurrent_submissions` (spec.md §4.H.2).
pub const DEFAULT_MAX_CONCURRENT_SUBMISSIONS: usize = 10;

/// Lower is higher priority (spec.md §4.H.2 ordering table). Strategy
/// overrides are clamped to `[-10, 10]` per the spec's "configurable per
/// strategy (±10)".
pub fn priority_key(order: &Order, overrides: &HashMap<StrategyId, i32>) -> i32 {
    let mut key = 100;
    key += match order.order_type {
        OrderType::Market => -20,
        OrderType::Limit => 0,
    };
    key += match order.side {
        Side::Sell => -5,
        Side::Buy => 0,
    };
    key += overrides.get(&order.strategy_name).copied().unwrap_or(0).clamp(-10, 10);
    key
}

struct QueuedOrder {
    order: Order,
    key: i32,
}

impl PartialEq for QueuedOrder {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.order.created_ts == other.order.created_ts
    }
}
impl Eq for QueuedOrder {}

impl PartialOrd for QueuedOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedOrder {
    /// `BinaryHeap` is a max-heap; a lower `key` (higher priority) and an
    /// older `created_ts` (FIFO tie-break) must compare as "greater" so
    /// they are popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key).then_with(|| other.order.created_ts.cmp(&self.order.created_ts))
    }
}

/// The dedup/expiry/priority-ordering contract of spec.md §4.H.2. Holds
/// no broker or bus reference — [`crate::engine::OrderEngine`] drains it.
pub struct PriorityQueue {
    heap: parking_lot::Mutex<BinaryHeap<QueuedOrder>>,
    in_flight: DashMap<(Symbol, Side, StrategyId), chrono::DateTime<Utc>>,
    overrides: HashMap<StrategyId, i32>,
    priority_timeout: Duration,
}

impl PriorityQueue {
    pub fn new(overrides: HashMap<StrategyId, i32>, priority_timeout: Duration) -> Self {
        Self {
            heap: parking_lot::Mutex::new(BinaryHeap::new()),
            in_flight: DashMap::new(),
            overrides,
            priority_timeout,
        }
    }

    /// Enqueues `order`, rejecting it if an identical `(symbol, side,
    /// strategy_name)` is already in flight — unless `order.liquidation`
    /// is set, per DESIGN.md Open Question 2: a liquidation must never be
    /// blocked by a pending same-key order.
    pub fn enqueue(&self, order: Order) -> Result<(), ExecutionError> {
        let dedup_key = order.dedup_key();
        if !order.liquidation && self.in_flight.contains_key(&dedup_key) {
            return Err(ExecutionError::DuplicateInFlight(order.id));
        }
        if !order.liquidation {
            self.in_flight.insert(dedup_key, order.created_ts);
        }
        let key = priority_key(&order, &self.overrides);
        self.heap.lock().push(QueuedOrder { order, key });
        Ok(())
    }

    /// Pops the single highest-priority order, or `None` if the queue is
    /// empty.
    pub fn pop(&self) -> Option<Order> {
        self.heap.lock().pop().map(|q| q.order)
    }

    /// Pushes `order` back onto the heap without re-running the dedup
    /// check (it is already marked in flight from its original
    /// `enqueue`). Used when the dispatcher pops an order but the
    /// concurrency cap has no free permit yet.
    pub fn requeue(&self, order: Order) {
        let key = priority_key(&order, &self.overrides);
        self.heap.lock().push(QueuedOrder { order, key });
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks `dedup_key` as no longer in flight once its order reaches a
    /// terminal state, unblocking the next order for that key.
    pub fn clear_in_flight(&self, dedup_key: &(Symbol, Side, StrategyId)) {
        self.in_flight.remove(dedup_key);
    }

    pub fn is_in_flight(&self, dedup_key: &(Symbol, Side, StrategyId)) -> bool {
        self.in_flight.contains_key(dedup_key)
    }

    /// Drains every order older than `priority_timeout` out of the queue
    /// (spec.md §4.H.2: "orders not submitted within `priority_timeout`
    /// transition to `FAILED(expired)`"). The rest of the heap is left
    /// intact in priority order.
    pub fn drain_expired(&self, now: DateTime<Utc>) -> Vec<Order> {
        let mut heap = self.heap.lock();
        let mut kept = BinaryHeap::new();
        let mut expired = Vec::new();
        while let Some(queued) = heap.pop() {
            let age = now.signed_duration_since(queued.order.created_ts);
            if age.to_std().map(|d| d >= self.priority_timeout).unwrap_or(false) {
                expired.push(queued.order);
            } else {
                kept.push(queued);
            }
        }
        *heap = kept;
        expired
    }
}
