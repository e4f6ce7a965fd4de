use crate::tick::MarketTick;
use async_trait::async_trait;
use kq_instrument::Symbol;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("adapter exhausted its reconnect budget and is giving up")]
    Exhausted,

    #[error("symbol {0} is not subscribed")]
    NotSubscribed(Symbol),
}

/// Health transitions an adapter reports alongside its tick stream
/// (spec.md §4.C "A health callback (`heartbeat`, `disconnected`,
/// `reconnected`)").
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AdapterHealth {
    Heartbeat,
    Disconnected,
    Reconnected,
}

/// Common interface every market data source implements, so the pipeline
/// (spec.md §4.D) is adapter-agnostic (spec.md §4.C "Adapters are
/// interchangeable").
#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), AdapterError>;
    async fn subscribe(&self, symbol: Symbol) -> Result<(), AdapterError>;
    async fn unsubscribe(&self, symbol: Symbol) -> Result<(), AdapterError>;

    /// Hands ownership of the normalized tick stream to its one consumer
    /// (the pipeline). `None` if already taken.
    fn take_ticks(&self) -> Option<tokio::sync::mpsc::Receiver<MarketTick>>;

    /// Hands ownership of the health-transition stream to its one
    /// consumer. `None` if already taken.
    fn take_health(&self) -> Option<tokio::sync::mpsc::Receiver<AdapterHealth>>;
}
