#![forbid(unsafe_code)]

//! Strategy Engine (spec.md §4.F): plugin contract, registry, per-strategy
//! bounded dispatch on `indicators_updated`, the required built-in
//! moving-average strategy, and opportunistic performance tracking.

pub mod builtin_ma;
pub mod engine;
pub mod error;
pub mod performance;
pub mod registry;
pub mod schema;
pub mod strategy;

pub use builtin_ma::{MovingAverageCrossConfig, MovingAverageCrossStrategy};
pub use engine::{StrategyEngine, DEFAULT_STRATEGY_TIMEOUT};
pub use error::StrategyError;
pub use performance::{PerformanceMetrics, PerformanceTracker};
pub use registry::{RegisteredStrategy, StrategyRegistry, SymbolScope};
pub use schema::{ParamSpec, ParamType, ParameterSchema};
pub use strategy::{AnalysisSnapshot, Strategy};
