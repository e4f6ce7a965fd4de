use std::fmt;

/// The closed set of named channels the bus routes. Adding a topic is a
/// breaking wire-format change, so this enum is deliberately exhaustive
/// rather than an open string — the topic names are the contract
/// (spec.md §4.A).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub enum Topic {
    MarketDataReceived,
    CandleClosed,
    IndicatorsUpdated,
    TradingSignal,
    OrderPlaced,
    OrderPartiallyExecuted,
    OrderFullyExecuted,
    OrderFailed,
    OrderCancelled,
    PositionUpdated,
    RiskAlert,
    EmergencyStop,
    Heartbeat,
    SystemStatus,
    StrategyActivated,
    StrategyDeactivated,
}

impl Topic {
    pub const ALL: [Topic; 16] = [
        Topic::MarketDataReceived,
        Topic::CandleClosed,
        Topic::IndicatorsUpdated,
        Topic::TradingSignal,
        Topic::OrderPlaced,
        Topic::OrderPartiallyExecuted,
        Topic::OrderFullyExecuted,
        Topic::OrderFailed,
        Topic::OrderCancelled,
        Topic::PositionUpdated,
        Topic::RiskAlert,
        Topic::EmergencyStop,
        Topic::Heartbeat,
        Topic::SystemStatus,
        Topic::StrategyActivated,
        Topic::StrategyDeactivated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::MarketDataReceived => "market_data_received",
            Topic::CandleClosed => "candle_closed",
            Topic::IndicatorsUpdated => "indicators_updated",
            Topic::TradingSignal => "trading_signal",
            Topic::OrderPlaced => "order_placed",
            Topic::OrderPartiallyExecuted => "order_partially_executed",
            Topic::OrderFullyExecuted => "order_fully_executed",
            Topic::OrderFailed => "order_failed",
            Topic::OrderCancelled => "order_cancelled",
            Topic::PositionUpdated => "position_updated",
            Topic::RiskAlert => "risk_alert",
            Topic::EmergencyStop => "emergency_stop",
            Topic::Heartbeat => "heartbeat",
            Topic::SystemStatus => "system_status",
            Topic::StrategyActivated => "strategy_activated",
            Topic::StrategyDeactivated => "strategy_deactivated",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The private, per-request topic a `risk_check` reply is delivered on.
/// Unlike the broadcast [`Topic`]s this is not part of the closed set: it
/// exists only for the lifetime of one request/response exchange and is
/// addressed by `correlation_id`, never subscribed to ahead of time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RiskCheckTopic;
