use crate::topic::Topic;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no subscribers for topic {0}")]
    NoSubscribers(Topic),

    #[error("no risk engine attached to answer risk_check requests")]
    NoRiskCheckResponder,

    #[error("risk_check timed out before a response arrived")]
    RiskCheckTimeout,

    #[error("risk_check request was cancelled before a response arrived")]
    RequestCancelled,

    #[error("bus is not running")]
    NotStarted,
}
