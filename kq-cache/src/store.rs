use crate::types::{BookSide, CachedCandle, IndicatorSnapshot, MarketSnapshot, OrderSnapshot, PositionSnapshot, TradeRecord};
use dashmap::DashMap;
use kq_instrument::{Interval, OrderId, Symbol};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// `trades:{symbol}` is capped at 100 regardless of configuration
/// (spec.md §4.B).
const TRADES_CAP: usize = 100;

const MARKET_TTL: Duration = Duration::from_secs(24 * 3600);
const INDICATORS_TTL: Duration = Duration::from_secs(3600);
const ORDERBOOK_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
enum CacheKey {
    Market(Symbol),
    Candles(Symbol, Interval),
    Indicators(Symbol, Interval),
    Position(Symbol),
    OrderBook(Symbol, BookSide),
    Trades(Symbol),
    Order(OrderId),
}

#[derive(Debug, Clone)]
enum CacheValue {
    Market(MarketSnapshot),
    Candles(VecDeque<CachedCandle>),
    Indicators(IndicatorSnapshot),
    Position(PositionSnapshot),
    OrderBook(BTreeMap<OrderedDecimal, Decimal>),
    Trades(VecDeque<TradeRecord>),
    Order(OrderSnapshot),
}

/// Wraps [`Decimal`] so it can key a [`BTreeMap`] by numeric order; `Decimal`
/// already implements `Ord`, this exists purely for a descriptive name at
/// the order book call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderedDecimal(Decimal);

struct Entry {
    value: CacheValue,
    inserted_at: Instant,
    expires_at: Option<Instant>,
    last_accessed_millis: AtomicU64,
    size_bytes: usize,
}

impl Entry {
    fn new(value: CacheValue, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        let size_bytes = estimate_size(&value);
        Self {
            value,
            inserted_at: now,
            expires_at: ttl.map(|d| now + d),
            last_accessed_millis: AtomicU64::new(0),
            size_bytes,
        }
    }

    fn touch(&self) {
        let elapsed = self.inserted_at.elapsed().as_millis() as u64;
        self.last_accessed_millis.store(elapsed, Ordering::Relaxed);
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// Rough serialized-size estimate used only to enforce the memory budget;
/// it need not be exact, only monotonic with entry growth.
fn estimate_size(value: &CacheValue) -> usize {
    match value {
        CacheValue::Market(v) => serde_json::to_vec(v).map(|b| b.len()).unwrap_or(256),
        CacheValue::Candles(ring) => ring.len() * 128 + 32,
        CacheValue::Indicators(v) => serde_json::to_vec(v).map(|b| b.len()).unwrap_or(256),
        CacheValue::Position(v) => serde_json::to_vec(v).map(|b| b.len()).unwrap_or(256),
        CacheValue::OrderBook(levels) => levels.len() * 48 + 32,
        CacheValue::Trades(trades) => trades.len() * 96 + 32,
        CacheValue::Order(v) => serde_json::to_vec(v).map(|b| b.len()).unwrap_or(256),
    }
}

/// In-memory implementation of the KV Cache (spec.md §4.B). Every keyspace
/// lives in one [`DashMap`] so a single LRU+TTL eviction pass can reason
/// about the whole memory budget at once; per-key writes are still atomic
/// (`DashMap`'s sharded locking), matching the "writes must be atomic per
/// key, multi-key updates are not" contract.
pub struct InMemoryCache {
    entries: DashMap<CacheKey, Entry>,
    ring_size: usize,
    memory_budget_bytes: RwLock<usize>,
}

impl InMemoryCache {
    /// `memory_budget_bytes` defaults to 150 MB per spec.md §6
    /// (`cache_memory_budget_mb`); `ring_size` defaults to 200
    /// (`ring_size` configuration key).
    pub fn new(ring_size: usize, memory_budget_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ring_size,
            memory_budget_bytes: RwLock::new(memory_budget_bytes),
        }
    }

    pub fn with_default_budget(ring_size: usize) -> Self {
        Self::new(ring_size, 150 * 1024 * 1024)
    }

    fn insert(&self, key: CacheKey, value: CacheValue, ttl: Option<Duration>) {
        self.entries.insert(key, Entry::new(value, ttl));
        self.enforce_budget();
    }

    fn current_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    /// Evicts expired entries first, then the least-recently-accessed
    /// remainder, until total estimated size is back under budget
    /// (spec.md §4.B: "evict by TTL priority first, LRU second").
    fn enforce_budget(&self) {
        let budget = *self.memory_budget_bytes.read();
        if self.current_bytes() <= budget {
            return;
        }

        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.is_expired())
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
        }
        if self.current_bytes() <= budget {
            return;
        }

        let mut candidates: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().last_accessed_millis.load(Ordering::Relaxed)))
            .collect();
        candidates.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in candidates {
            if self.current_bytes() <= budget {
                break;
            }
            self.entries.remove(&key);
            debug!(?key, "evicted cache entry under memory pressure");
        }
    }

    pub fn set_memory_budget_bytes(&self, bytes: usize) {
        *self.memory_budget_bytes.write() = bytes;
    }

    pub fn put_market_snapshot(&self, snapshot: MarketSnapshot) {
        let key = CacheKey::Market(snapshot.symbol.clone());
        self.insert(key, CacheValue::Market(snapshot), Some(MARKET_TTL));
    }

    pub fn get_market_snapshot(&self, symbol: &Symbol) -> Option<MarketSnapshot> {
        let key = CacheKey::Market(symbol.clone());
        let entry = self.entries.get(&key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        entry.touch();
        match &entry.value {
            CacheValue::Market(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Bounded push + trim in one step, per the "not push-then-trim-later"
    /// contract: the ring never exceeds `ring_size` even transiently.
    pub fn push_candle(&self, symbol: &Symbol, interval: Interval, candle: CachedCandle) {
        let key = CacheKey::Candles(symbol.clone(), interval);
        let mut entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Entry::new(CacheValue::Candles(VecDeque::new()), None));
        if let CacheValue::Candles(ring) = &mut entry.value {
            ring.push_front(candle);
            ring.truncate(self.ring_size);
        }
        entry.size_bytes = estimate_size(&entry.value);
        entry.touch();
        drop(entry);
        self.enforce_budget();
    }

    /// Newest-first, per spec.md §3 ("newest at head").
    pub fn get_candles(&self, symbol: &Symbol, interval: Interval) -> Vec<CachedCandle> {
        let key = CacheKey::Candles(symbol.clone(), interval);
        let Some(entry) = self.entries.get(&key) else {
            return Vec::new();
        };
        entry.touch();
        match &entry.value {
            CacheValue::Candles(ring) => ring.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn put_indicators(&self, symbol: &Symbol, interval: Interval, snapshot: IndicatorSnapshot) {
        let key = CacheKey::Indicators(symbol.clone(), interval);
        self.insert(key, CacheValue::Indicators(snapshot), Some(INDICATORS_TTL));
    }

    pub fn get_indicators(&self, symbol: &Symbol, interval: Interval) -> Option<IndicatorSnapshot> {
        let key = CacheKey::Indicators(symbol.clone(), interval);
        let entry = self.entries.get(&key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        entry.touch();
        match &entry.value {
            CacheValue::Indicators(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn put_position(&self, position: PositionSnapshot) {
        let key = CacheKey::Position(position.symbol.clone());
        self.insert(key, CacheValue::Position(position), None);
    }

    pub fn get_position(&self, symbol: &Symbol) -> Option<PositionSnapshot> {
        let key = CacheKey::Position(symbol.clone());
        let entry = self.entries.get(&key)?;
        entry.touch();
        match &entry.value {
            CacheValue::Position(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn all_positions(&self) -> Vec<PositionSnapshot> {
        self.entries
            .iter()
            .filter_map(|e| match &e.value {
                CacheValue::Position(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn put_orderbook_level(&self, symbol: &Symbol, side: BookSide, price: Decimal, qty: Decimal) {
        let key = CacheKey::OrderBook(symbol.clone(), side);
        let mut entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Entry::new(CacheValue::OrderBook(BTreeMap::new()), Some(ORDERBOOK_TTL)));
        entry.expires_at = Some(Instant::now() + ORDERBOOK_TTL);
        if let CacheValue::OrderBook(levels) = &mut entry.value {
            if qty.is_zero() {
                levels.remove(&OrderedDecimal(price));
            } else {
                levels.insert(OrderedDecimal(price), qty);
            }
        }
        entry.size_bytes = estimate_size(&entry.value);
        entry.touch();
        drop(entry);
        self.enforce_budget();
    }

    /// Bids descend from best (highest) price; asks ascend from best
    /// (lowest) price.
    pub fn get_orderbook(&self, symbol: &Symbol, side: BookSide) -> Vec<(Decimal, Decimal)> {
        let key = CacheKey::OrderBook(symbol.clone(), side);
        let Some(entry) = self.entries.get(&key) else {
            return Vec::new();
        };
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(&key);
            return Vec::new();
        }
        entry.touch();
        let CacheValue::OrderBook(levels) = &entry.value else {
            return Vec::new();
        };
        let mut out: Vec<(Decimal, Decimal)> = levels.iter().map(|(p, q)| (p.0, *q)).collect();
        if side == BookSide::Bids {
            out.reverse();
        }
        out
    }

    pub fn push_trade(&self, symbol: &Symbol, trade: TradeRecord) {
        let key = CacheKey::Trades(symbol.clone());
        let mut entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Entry::new(CacheValue::Trades(VecDeque::new()), None));
        if let CacheValue::Trades(trades) = &mut entry.value {
            trades.push_front(trade);
            trades.truncate(TRADES_CAP);
        }
        entry.size_bytes = estimate_size(&entry.value);
        entry.touch();
        drop(entry);
        self.enforce_budget();
    }

    pub fn get_trades(&self, symbol: &Symbol) -> Vec<TradeRecord> {
        let key = CacheKey::Trades(symbol.clone());
        let Some(entry) = self.entries.get(&key) else {
            return Vec::new();
        };
        entry.touch();
        match &entry.value {
            CacheValue::Trades(trades) => trades.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Mirrors one non-terminal order into `orders:{order_id}` (spec.md
    /// §4.H.2). Overwrites any prior snapshot for the same id.
    pub fn put_order_snapshot(&self, snapshot: OrderSnapshot) {
        let key = CacheKey::Order(snapshot.order_id);
        self.insert(key, CacheValue::Order(snapshot), None);
    }

    pub fn get_order_snapshot(&self, order_id: OrderId) -> Option<OrderSnapshot> {
        let key = CacheKey::Order(order_id);
        let entry = self.entries.get(&key)?;
        entry.touch();
        match &entry.value {
            CacheValue::Order(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Drops the durable mirror once an order reaches a terminal state —
    /// only non-terminal orders need to survive a crash + restart.
    pub fn remove_order_snapshot(&self, order_id: OrderId) {
        self.entries.remove(&CacheKey::Order(order_id));
    }

    /// Every mirrored non-terminal order, for resuming the priority queue
    /// after a restart.
    pub fn all_order_snapshots(&self) -> Vec<OrderSnapshot> {
        self.entries
            .iter()
            .filter_map(|e| match &e.value {
                CacheValue::Order(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn memory_bytes(&self) -> usize {
        self.current_bytes()
    }
}
