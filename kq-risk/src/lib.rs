#![forbid(unsafe_code)]

//! Risk Engine (spec.md §4.G): the synchronous ten-rule `risk_check` chain
//! plus three asynchronous monitors — stop-loss/take-profit, emergency
//! stop, and the periodic portfolio risk monitor — and a position size
//! recommender strategies can call on request.

pub mod config;
pub mod context;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod rules;
pub mod sizing;
pub mod stop_loss;

pub use config::RiskConfig;
pub use context::{IntendedOrder, RiskContext};
pub use emergency::{ArmTrigger, EmergencyStop};
pub use engine::RiskEngine;
pub use error::RiskError;
pub use monitor::{PortfolioMetrics, PortfolioRiskMonitor};
pub use rules::{Decision, RiskCheckResult, RiskRule, RiskRuleChain, RuleOutcome};
pub use sizing::{PositionSizeRecommender, SizingMode};
pub use stop_loss::StopLossMonitor;
