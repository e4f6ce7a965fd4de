//! The process-wide typed event bus: a closed set of [`Topic`]s, one
//! bounded broadcast channel each, plus a correlation-keyed
//! request/response path for the risk engine's synchronous `risk_check`.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod payload;
pub mod topic;

pub use bus::{Delivery, EventBus, Subscription, DEFAULT_RISK_CHECK_TIMEOUT};
pub use envelope::Envelope;
pub use error::BusError;
pub use metrics::{BusMetrics, TopicCounters, TopicSnapshot};
pub use payload::{BusMessage, RiskCheckRequest, RiskCheckResponse, RiskDecision};
pub use topic::Topic;
