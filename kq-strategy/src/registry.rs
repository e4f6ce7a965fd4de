//! Strategy registry (spec.md §4.F): the engine owns every live strategy
//! instance and its private state; this is the only place that instance
//! lives. Load/unload/hot-reload are explicit registry operations rather
//! than runtime discovery by string — the spec's §REDESIGN FLAGS steers
//! away from dynamic module loading in favor of an explicit registry.

use crate::error::StrategyError;
use crate::strategy::Strategy;
use dashmap::DashMap;
use kq_instrument::{StrategyId, Symbol};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Which symbols a strategy instance is dispatched for.
#[derive(Debug, Clone)]
pub enum SymbolScope {
    All,
    Only(BTreeSet<Symbol>),
}

impl SymbolScope {
    pub fn contains(&self, symbol: &Symbol) -> bool {
        match self {
            SymbolScope::All => true,
            SymbolScope::Only(set) => set.contains(symbol),
        }
    }
}

/// One registered strategy instance plus the bookkeeping the engine needs
/// to dispatch to it and auto-deactivate it on repeated timeouts.
pub struct RegisteredStrategy {
    pub instance: Mutex<Box<dyn Strategy>>,
    pub scope: SymbolScope,
    pub priority_override: i32,
    active: AtomicBool,
    consecutive_timeouts: AtomicU32,
}

impl RegisteredStrategy {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Resets the consecutive-timeout counter after a successful dispatch.
    pub fn record_success(&self) {
        self.consecutive_timeouts.store(0, Ordering::Release);
    }

    /// Increments the counter and returns `true` once it reaches three
    /// (spec.md §4.F: "three consecutive timeouts auto-deactivate").
    pub fn record_timeout(&self) -> bool {
        self.consecutive_timeouts.fetch_add(1, Ordering::AcqRel) + 1 >= 3
    }
}

/// Holds every strategy the engine knows about, keyed by name.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: DashMap<StrategyId, Arc<RegisteredStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self { strategies: DashMap::new() }
    }

    /// Loads a strategy, calling `on_start` before it becomes dispatchable.
    pub fn register(
        &self,
        id: StrategyId,
        mut strategy: Box<dyn Strategy>,
        scope: SymbolScope,
        priority_override: i32,
    ) -> Result<(), StrategyError> {
        if self.strategies.contains_key(&id) {
            return Err(StrategyError::AlreadyRegistered(id));
        }
        strategy.on_start();
        self.strategies.insert(
            id,
            Arc::new(RegisteredStrategy {
                instance: Mutex::new(strategy),
                scope,
                priority_override,
                active: AtomicBool::new(true),
                consecutive_timeouts: AtomicU32::new(0),
            }),
        );
        Ok(())
    }

    /// Unloads a strategy, calling `on_stop` first.
    pub fn unregister(&self, id: &StrategyId) -> Result<(), StrategyError> {
        let (_, entry) = self.strategies.remove(id).ok_or_else(|| StrategyError::NotFound(id.clone()))?;
        entry.instance.lock().on_stop();
        Ok(())
    }

    /// Hot-reloads a strategy in place: unloads the old instance (if any)
    /// and loads the new one under the same name.
    pub fn reload(
        &self,
        id: StrategyId,
        strategy: Box<dyn Strategy>,
        scope: SymbolScope,
        priority_override: i32,
    ) -> Result<(), StrategyError> {
        let _ = self.unregister(&id);
        self.register(id, strategy, scope, priority_override)
    }

    pub fn get(&self, id: &StrategyId) -> Option<Arc<RegisteredStrategy>> {
        self.strategies.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Active strategies whose scope includes `symbol`, for dispatch on
    /// an `indicators_updated` event for that symbol.
    pub fn active_for_symbol(&self, symbol: &Symbol) -> Vec<(StrategyId, Arc<RegisteredStrategy>)> {
        self.strategies
            .iter()
            .filter(|entry| entry.value().is_active() && entry.value().scope.contains(symbol))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::AnalysisSnapshot;
    use kq_bus::payload::TradingSignal;
    use std::collections::BTreeSet as Set;

    struct Noop;
    impl Strategy for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn required_indicators(&self) -> Set<String> {
            Set::new()
        }
        fn analyze(&mut self, _snapshot: &AnalysisSnapshot) -> Option<TradingSignal> {
            None
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = StrategyRegistry::new();
        let id = StrategyId::new("noop");
        registry.register(id.clone(), Box::new(Noop), SymbolScope::All, 0).unwrap();
        let err = registry.register(id, Box::new(Noop), SymbolScope::All, 0).unwrap_err();
        assert!(matches!(err, StrategyError::AlreadyRegistered(_)));
    }

    #[test]
    fn three_consecutive_timeouts_trip_the_threshold() {
        let registry = StrategyRegistry::new();
        let id = StrategyId::new("noop");
        registry.register(id.clone(), Box::new(Noop), SymbolScope::All, 0).unwrap();
        let entry = registry.get(&id).unwrap();
        assert!(!entry.record_timeout());
        assert!(!entry.record_timeout());
        assert!(entry.record_timeout());
    }

    #[test]
    fn unregister_of_unknown_strategy_errors() {
        let registry = StrategyRegistry::new();
        let err = registry.unregister(&StrategyId::new("ghost")).unwrap_err();
        assert!(matches!(err, StrategyError::NotFound(_)));
    }
}
