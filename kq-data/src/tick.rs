use chrono::{DateTime, Utc};
use kq_instrument::Symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A normalized tick as produced by an adapter (spec.md §3 `MarketTick`).
/// Immutable once constructed; adapters must populate every field or
/// reject the source record rather than emit a partial tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: Symbol,
    pub ts: DateTime<Utc>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub volume: Decimal,
    pub source: TickSource,
}

/// Known adapter origins. Closed set, matching spec.md §3 ("source is one
/// of a known set").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum TickSource {
    KrxStream,
    KrxPolled,
}

impl std::fmt::Display for TickSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TickSource::KrxStream => "krx_stream",
            TickSource::KrxPolled => "krx_polled",
        };
        write!(f, "{s}")
    }
}
