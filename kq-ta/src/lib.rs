#![forbid(unsafe_code)]

//! Technical Analyzer (spec.md §4.E): incremental indicator primitives
//! plus the `candle_closed`-driven recompute-and-publish loop.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod indicators;

pub use analyzer::TechnicalAnalyzer;
pub use config::AnalyzerConfig;
pub use error::AnalyzerError;
pub use indicators::{Atr, Bollinger, BollingerValue, Ema, Macd, MacdValue, Rsi, Sma, Stochastic, StochasticValue};
