//! Wire payload types, one per [`crate::Topic`]. These are the DTOs that
//! cross the bus; subsystem crates keep their own richer domain types and
//! convert to/from these at the boundary, keeping the bus itself free of
//! a dependency on every producer crate.

use chrono::{DateTime, Utc};
use kq_instrument::{OrderId, OrderType, Side, StrategyId, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Published for every tick that survives the pipeline's quality gates
/// (spec.md §4.D).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataReceived {
    pub symbol: Symbol,
    pub ts: DateTime<Utc>,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Published when a candle bucket closes (spec.md §4.D).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleClosed {
    pub symbol: Symbol,
    pub interval: kq_instrument::Interval,
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Full indicator snapshot for one `(symbol, interval)` (spec.md §4.E).
/// Carries the complete set so strategies never need to re-read the
/// cache for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorsUpdated {
    pub symbol: Symbol,
    pub interval: kq_instrument::Interval,
    pub ts: DateTime<Utc>,
    pub candle_close: Decimal,
    pub values: BTreeMap<String, Decimal>,
}

/// A strategy's trading decision (spec.md §3 `TradingSignal`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub strategy_name: StrategyId,
    pub symbol: Symbol,
    pub action: SignalAction,
    pub confidence: Decimal,
    pub suggested_price: Option<Decimal>,
    pub reason: String,
    pub ts: DateTime<Utc>,
    /// Set by stop-loss/take-profit monitors (spec.md §4.G.2); exempts the
    /// signal from the order engine's duplicate-in-flight rule so a
    /// liquidation is never blocked by a pending same-key buy (DESIGN.md
    /// Open Question 2).
    pub liquidation: bool,
    pub source: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    HoldExit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub strategy_name: StrategyId,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPartiallyExecuted {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub fill_qty: Decimal,
    pub fill_price: Decimal,
    pub filled_qty_total: Decimal,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFullyExecuted {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub filled_qty: Decimal,
    pub avg_fill_price: Decimal,
    pub commission_paid: Decimal,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFailed {
    pub order_id: Option<OrderId>,
    pub symbol: Symbol,
    pub strategy_name: StrategyId,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub filled_qty: Decimal,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdated {
    pub symbol: Symbol,
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_mark_price: Decimal,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub severity: Severity,
    pub metric: String,
    pub value: Decimal,
    pub threshold: Decimal,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyStop {
    pub armed: bool,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub source_id: String,
    pub ts: DateTime<Utc>,
}

/// Catch-all operational topic. In addition to generic health/error
/// reporting this also carries the `quality_issue` (spec.md §4.D) and
/// `partial_fill_stalled` (spec.md §4.H.4) notifications — the spec names
/// those as events to "emit" without adding them to the closed topic set
/// of spec.md §4.A, so both are modelled as [`SystemStatusKind`] variants
/// on this topic rather than as new topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub kind: SystemStatusKind,
    pub component: String,
    pub detail: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum SystemStatusKind {
    Ok,
    Degraded,
    Error,
    QualityIssue,
    PartialFillStalled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyActivated {
    pub strategy_name: StrategyId,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDeactivated {
    pub strategy_name: StrategyId,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

/// The `risk_check` synchronous request/response pair (spec.md §4.G.1).
/// Sent over the bus's request/response path rather than a broadcast
/// topic since it is a 1:1 RPC, not fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckRequest {
    pub correlation_id: Uuid,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub strategy_name: StrategyId,
    pub liquidation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckResponse {
    pub correlation_id: Uuid,
    pub decision: RiskDecision,
    pub adjusted_quantity: Option<Decimal>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum RiskDecision {
    Approve,
    Adjust,
    Reject,
}

/// Union of every payload type that can cross the bus. A single broadcast
/// channel per [`crate::Topic`] carries [`crate::Envelope<BusMessage>`]
/// values; subscribers match on the variant that corresponds to the topic
/// they subscribed to (enforced by construction: [`crate::EventBus::publish`]
/// only accepts the variant matching its `topic` argument).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    MarketDataReceived(MarketDataReceived),
    CandleClosed(CandleClosed),
    IndicatorsUpdated(IndicatorsUpdated),
    TradingSignal(TradingSignal),
    OrderPlaced(OrderPlaced),
    OrderPartiallyExecuted(OrderPartiallyExecuted),
    OrderFullyExecuted(OrderFullyExecuted),
    OrderFailed(OrderFailed),
    OrderCancelled(OrderCancelled),
    PositionUpdated(PositionUpdated),
    RiskAlert(RiskAlert),
    EmergencyStop(EmergencyStop),
    Heartbeat(Heartbeat),
    SystemStatus(SystemStatus),
    StrategyActivated(StrategyActivated),
    StrategyDeactivated(StrategyDeactivated),
}

impl BusMessage {
    /// The [`crate::Topic`] this message variant belongs to.
    pub fn topic(&self) -> crate::Topic {
        use crate::Topic;
        match self {
            BusMessage::MarketDataReceived(_) => Topic::MarketDataReceived,
            BusMessage::CandleClosed(_) => Topic::CandleClosed,
            BusMessage::IndicatorsUpdated(_) => Topic::IndicatorsUpdated,
            BusMessage::TradingSignal(_) => Topic::TradingSignal,
            BusMessage::OrderPlaced(_) => Topic::OrderPlaced,
            BusMessage::OrderPartiallyExecuted(_) => Topic::OrderPartiallyExecuted,
            BusMessage::OrderFullyExecuted(_) => Topic::OrderFullyExecuted,
            BusMessage::OrderFailed(_) => Topic::OrderFailed,
            BusMessage::OrderCancelled(_) => Topic::OrderCancelled,
            BusMessage::PositionUpdated(_) => Topic::PositionUpdated,
            BusMessage::RiskAlert(_) => Topic::RiskAlert,
            BusMessage::EmergencyStop(_) => Topic::EmergencyStop,
            BusMessage::Heartbeat(_) => Topic::Heartbeat,
            BusMessage::SystemStatus(_) => Topic::SystemStatus,
            BusMessage::StrategyActivated(_) => Topic::StrategyActivated,
            BusMessage::StrategyDeactivated(_) => Topic::StrategyDeactivated,
        }
    }
}

/// Self-describing envelope used when the bus is backed by an external
/// pub/sub broker instead of purely in-process channels (spec.md §4.A:
/// "each envelope is serialized with a self-describing format that
/// includes topic and a version field").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub topic: String,
    pub version: u16,
    pub body: serde_json::Value,
}

impl WireEnvelope {
    pub const CURRENT_VERSION: u16 = 1;

    pub fn encode<T: Serialize>(topic: crate::Topic, body: &T) -> serde_json::Result<Self> {
        Ok(Self {
            topic: topic.as_str().to_string(),
            version: Self::CURRENT_VERSION,
            body: serde_json::to_value(body)?,
        })
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Topic;
    use rust_decimal_macros::dec;

    #[test]
    fn wire_envelope_roundtrips() {
        let payload = Heartbeat {
            source_id: "kq-bus".into(),
            ts: DateTime::<Utc>::UNIX_EPOCH,
        };
        let encoded = WireEnvelope::encode(Topic::Heartbeat, &payload).unwrap();
        assert_eq!(encoded.topic, "heartbeat");
        assert_eq!(encoded.version, WireEnvelope::CURRENT_VERSION);

        let decoded: Heartbeat = encoded.decode().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn risk_check_response_carries_adjustment() {
        let resp = RiskCheckResponse {
            correlation_id: Uuid::nil(),
            decision: RiskDecision::Adjust,
            adjusted_quantity: Some(dec!(6)),
            reasons: vec!["position_size".into()],
        };
        assert_eq!(resp.adjusted_quantity, Some(dec!(6)));
    }
}
