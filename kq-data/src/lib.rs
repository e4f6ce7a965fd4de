#![forbid(unsafe_code)]

//! KRX Adapter Set + Market Data Pipeline (spec.md §4.C/4.D): normalizes
//! ticks from interchangeable streaming/polled sources, runs them through
//! an ordered quality-gate chain, assembles candles, and publishes
//! `market_data_received` / `candle_closed` to the event bus.

pub mod adapter;
pub mod backoff;
pub mod candle;
pub mod error;
pub mod pipeline;
pub mod polled;
pub mod quality;
pub mod streaming;
pub mod tick;

pub use adapter::{AdapterError, AdapterHealth, MarketDataAdapter};
pub use backoff::ReconnectBackoff;
pub use candle::{CandleAssembler, ClosedCandle};
pub use error::PipelineError;
pub use pipeline::MarketDataPipeline;
pub use polled::KrxPolledAdapter;
pub use quality::{GateOutcome, GateSeverity, QualityConfig, QualityGateChain};
pub use streaming::KrxStreamAdapter;
pub use tick::{MarketTick, TickSource};
