use kq_cache::CacheError;
use kq_instrument::Symbol;

#[derive(Debug, thiserror::Error)]
pub enum RiskError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("risk context unavailable for {0}: {1}")]
    ContextUnavailable(Symbol, &'static str),

    #[error("emergency stop is armed: {0}")]
    EmergencyStopArmed(String),

    #[error("invalid disarm token")]
    InvalidDisarmToken,
}
