//! Plugin contract (spec.md §4.F). A [`Strategy`] is a pure decision
//! function plus lifecycle hooks; the engine owns the instance and all of
//! its private state (entry price, holding flag, rate counters) — nothing
//! here is ever shared across strategy instances.

use crate::schema::ParameterSchema;
use kq_bus::payload::{CandleClosed, TradingSignal};
use kq_cache::IndicatorSnapshot;
use kq_instrument::Symbol;
use std::collections::{BTreeMap, BTreeSet};

/// Everything a strategy needs to make one decision. Built by the engine
/// from the `indicators_updated` event plus whatever cached state the
/// strategy asked for via [`Strategy::other_symbols`].
#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    pub symbol: Symbol,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub candle: CandleClosed,
    pub indicators: BTreeMap<String, rust_decimal::Decimal>,
    /// Indicator snapshots for any extra symbols the strategy declared
    /// interest in via [`Strategy::other_symbols`] (spec.md §4.F
    /// `subscribed_symbols_state`). Empty unless requested.
    pub other_symbols: BTreeMap<Symbol, IndicatorSnapshot>,
}

/// A strategy plugin (spec.md §4.F plugin contract).
pub trait Strategy: Send + Sync {
    /// Unique strategy name, used as the `strategy_name` tag on every
    /// signal and as the `StrategyId` key in the registry.
    fn name(&self) -> &str;

    /// Indicator keys (e.g. `"sma_5"`) that must be present in the
    /// snapshot before `analyze` is invoked. The engine skips dispatch
    /// (without counting it as a timeout or failure) when any are
    /// missing.
    fn required_indicators(&self) -> BTreeSet<String>;

    /// Declared parameters and their validation bounds.
    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    /// Extra symbols this strategy wants indicator state for, beyond the
    /// one the dispatch is firing for. Defaults to none.
    fn other_symbols(&self) -> Vec<Symbol> {
        Vec::new()
    }

    /// Makes one decision. `None` means "no signal this tick".
    fn analyze(&mut self, snapshot: &AnalysisSnapshot) -> Option<TradingSignal>;

    /// Called once when the engine activates this strategy instance.
    fn on_start(&mut self) {}

    /// Called once when the engine deactivates this strategy instance
    /// (manual unload, hot-reload, or timeout auto-deactivation).
    fn on_stop(&mut self) {}
}
