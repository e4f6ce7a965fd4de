#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

//! # kq-instrument
//! Shared value types used across every `kq-*` crate: the 6-digit KRX
//! [`Symbol`], candle [`Interval`]s, order [`Side`]/[`OrderType`]/[`Tif`],
//! and small newtype identifiers for strategies and orders.
//!
//! Kept deliberately small and dependency-light so every other crate in
//! the workspace can depend on it without pulling in async runtimes or
//! I/O.

use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// A 6-digit KRX ticker code (eg/ "005930" for Samsung Electronics).
///
/// Adapters are responsible for canonicalising exchange-suffixed codes
/// (eg/ "005930.KS") down to this bare form before a [`Symbol`] is
/// constructed.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Symbol(SmolStr);

impl Symbol {
    /// Constructs a new [`Symbol`], rejecting anything that isn't exactly
    /// 6 ASCII digits.
    pub fn new(code: impl AsRef<str>) -> Result<Self, InstrumentError> {
        let code = code.as_ref();
        if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(SmolStr::new(code)))
        } else {
            Err(InstrumentError::InvalidSymbol(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Candle aggregation interval.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl Interval {
    /// Bucket width as a [`chrono::Duration`].
    pub fn duration(self) -> chrono::Duration {
        match self {
            Interval::M1 => chrono::Duration::minutes(1),
            Interval::M5 => chrono::Duration::minutes(5),
            Interval::M15 => chrono::Duration::minutes(15),
            Interval::H1 => chrono::Duration::hours(1),
            Interval::D1 => chrono::Duration::days(1),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::D1 => "1d",
        };
        write!(f, "{s}")
    }
}

/// Buy or sell.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Order type as defined in spec.md §3 (`Order` entity).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
pub enum Tif {
    #[default]
    Day,
    Ioc,
    Fok,
}

/// Unique, stable name of a strategy instance (eg/ "ma_1m_5m").
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, From, Display,
)]
pub struct StrategyId(SmolStr);

impl StrategyId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Unique client-generated order identifier, reused across retries of the
/// same logical `place` call so the broker sees an idempotent request.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Constructor,
)]
pub struct OrderId(pub uuid::Uuid);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OrderId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

/// Sector classification used by the risk engine's `SectorExposure` rule.
/// A real deployment would source this from an instrument master; for the
/// core it is supplied directly by configuration (`symbol -> sector`).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Sector(SmolStr);

impl Sector {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("symbol {0:?} is not a 6-digit KRX code")]
    InvalidSymbol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_accepts_six_digit_codes() {
        assert!(Symbol::new("005930").is_ok());
        assert!(Symbol::new("000660").is_ok());
    }

    #[test]
    fn symbol_rejects_non_krx_codes() {
        assert!(Symbol::new("005930.KS").is_err());
        assert!(Symbol::new("AAPL").is_err());
        assert!(Symbol::new("12345").is_err());
        assert!(Symbol::new("1234567").is_err());
    }

    #[test]
    fn interval_duration_matches_bucket_width() {
        assert_eq!(Interval::M1.duration(), chrono::Duration::minutes(1));
        assert_eq!(Interval::M5.duration(), chrono::Duration::minutes(5));
        assert_eq!(Interval::D1.duration(), chrono::Duration::days(1));
    }

    #[test]
    fn strategy_id_roundtrips_through_json() {
        let id = StrategyId::new("ma_1m_5m");
        let json = serde_json::to_string(&id).unwrap();
        let back: StrategyId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
