#![forbid(unsafe_code)]

//! Order Engine (spec.md §4.H): priority queue, rate-limited broker
//! submission with retry, fill tracking and the partial-fill watchdog, and
//! Korean-market position/commission/tax accounting.

pub mod broker;
pub mod commission;
pub mod config;
pub mod engine;
pub mod error;
pub mod order;
pub mod position;
pub mod queue;
pub mod rate_limit;
pub mod tracker;

pub use broker::{BrokerClient, MockBrokerClient, PlaceAck, SharedBrokerClient};
pub use commission::{CommissionBreakdown, CommissionConfig};
pub use config::ExecutionConfig;
pub use engine::OrderEngine;
pub use error::ExecutionError;
pub use order::{Fill, Order, OrderBuilder, OrderState};
pub use position::{PositionAccount, PositionBook};
pub use queue::{PriorityQueue, DEFAULT_MAX_CONCURRENT_SUBMISSIONS, DEFAULT_PRIORITY_TIMEOUT};
pub use rate_limit::{Priority, RateLimiter, DEFAULT_RATE_LIMIT_RPS};
pub use tracker::{ExecutionTracker, FillOutcome, DEFAULT_MAX_FILLS_PER_ORDER, DEFAULT_MAX_PARTIAL_FILL_TIME};
