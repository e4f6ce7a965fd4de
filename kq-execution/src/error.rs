use kq_instrument::{OrderId, Symbol};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("order builder missing required field")]
    BuilderIncomplete,

    #[error("order {0} is a duplicate of an in-flight order for the same (symbol, side, strategy)")]
    DuplicateInFlight(OrderId),

    #[error("unknown symbol {0}")]
    UnknownSymbol(Symbol),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {0} is already in a terminal state")]
    AlreadyTerminal(OrderId),

    #[error("cache error: {0}")]
    Cache(#[from] kq_cache::CacheError),

    #[error("broker call failed: {0}")]
    Broker(String),

    #[error("broker call timed out")]
    BrokerTimeout,

    #[error("component is degraded and refuses further writes until operator reset")]
    Degraded,
}

impl ExecutionError {
    /// Spec.md §4.H.3 retries network/broker errors with exponential
    /// backoff up to 3 attempts; a validation-style error (bad order,
    /// unknown symbol, ...) is never worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ExecutionError::Broker(_) | ExecutionError::BrokerTimeout)
    }
}
