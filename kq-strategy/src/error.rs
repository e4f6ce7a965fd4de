use kq_cache::CacheError;
use kq_instrument::StrategyId;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("strategy {0} is already registered")]
    AlreadyRegistered(StrategyId),

    #[error("strategy {0} is not registered")]
    NotFound(StrategyId),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("strategy {0} exceeded its dispatch timeout")]
    Timeout(StrategyId),
}
