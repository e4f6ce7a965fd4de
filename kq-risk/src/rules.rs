//! The ten synchronous risk rules (spec.md §4.G.1 table), evaluated in a
//! fixed order by [`RiskRuleChain`]. Grounded on the teacher's
//! `jackbot/src/risk/check::RiskCheck` trait shape (`name()` + a single
//! `check` method per rule), generalized from a boolean pass/fail to the
//! three-way APPROVE/ADJUST/REJECT outcome the spec requires.

use crate::config::RiskConfig;
use crate::context::{IntendedOrder, RiskContext};
use rust_decimal::Decimal;

/// One rule's verdict. `Adjust` terminates the chain with the adjusted
/// quantity; `Reject` terminates it with no order placed.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Approve,
    Adjust { adjusted_quantity: Decimal, reason: String },
    Reject { reason: String },
}

pub trait RiskRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome;
}

/// Final decision produced by the chain; shaped to convert directly into
/// [`kq_bus::payload::RiskCheckResponse`] at the bus boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskCheckResult {
    pub decision: Decision,
    pub adjusted_quantity: Option<Decimal>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Decision {
    Approve,
    Adjust,
    Reject,
}

pub struct PositionSizeRule {
    pub max_position_ratio: Decimal,
}
impl RiskRule for PositionSizeRule {
    fn name(&self) -> &'static str {
        "PositionSize"
    }
    fn evaluate(&self, order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        if ctx.portfolio_value.is_zero() {
            return RuleOutcome::Reject { reason: "portfolio_value is zero".to_string() };
        }
        let projected = ctx.existing_notional_for_symbol + order.notional();
        let ratio = projected / ctx.portfolio_value;
        if ratio <= self.max_position_ratio {
            return RuleOutcome::Approve;
        }
        let cap_notional = self.max_position_ratio * ctx.portfolio_value - ctx.existing_notional_for_symbol;
        if cap_notional <= Decimal::ZERO || order.price.is_zero() {
            return RuleOutcome::Reject { reason: "position_size_exceeded".to_string() };
        }
        let adjusted_quantity = (cap_notional / order.price).floor();
        if adjusted_quantity < Decimal::ONE {
            RuleOutcome::Reject { reason: "position_size_exceeded".to_string() }
        } else {
            RuleOutcome::Adjust { adjusted_quantity, reason: "position_size_capped".to_string() }
        }
    }
}

pub struct SectorExposureRule {
    pub max_sector_ratio: Decimal,
}
impl RiskRule for SectorExposureRule {
    fn name(&self) -> &'static str {
        "SectorExposure"
    }
    fn evaluate(&self, order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        if ctx.sector.is_none() || ctx.portfolio_value.is_zero() {
            return RuleOutcome::Approve;
        }
        let projected = ctx.existing_notional_for_sector + order.notional();
        if projected / ctx.portfolio_value <= self.max_sector_ratio {
            RuleOutcome::Approve
        } else {
            RuleOutcome::Reject { reason: "sector_exposure_exceeded".to_string() }
        }
    }
}

pub struct DailyLossRule {
    pub max_daily_loss: Decimal,
}
impl RiskRule for DailyLossRule {
    fn name(&self) -> &'static str {
        "DailyLoss"
    }
    fn evaluate(&self, _order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        if ctx.realized_pnl_today > -self.max_daily_loss {
            RuleOutcome::Approve
        } else {
            RuleOutcome::Reject { reason: "daily_loss_limit_exceeded".to_string() }
        }
    }
}

pub struct MonthlyLossRule {
    pub max_monthly_loss: Decimal,
}
impl RiskRule for MonthlyLossRule {
    fn name(&self) -> &'static str {
        "MonthlyLoss"
    }
    fn evaluate(&self, _order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        if ctx.realized_pnl_month > -self.max_monthly_loss {
            RuleOutcome::Approve
        } else {
            RuleOutcome::Reject { reason: "monthly_loss_limit_exceeded".to_string() }
        }
    }
}

pub struct CashReserveRule {
    pub min_cash_reserve_ratio: Decimal,
}
impl RiskRule for CashReserveRule {
    fn name(&self) -> &'static str {
        "CashReserve"
    }
    fn evaluate(&self, order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        let reserve_floor = self.min_cash_reserve_ratio * ctx.portfolio_value;
        if ctx.cash - order.notional() >= reserve_floor {
            return RuleOutcome::Approve;
        }
        if order.price.is_zero() {
            return RuleOutcome::Reject { reason: "cash_reserve_breached".to_string() };
        }
        let spendable = ctx.cash - reserve_floor;
        if spendable <= Decimal::ZERO {
            return RuleOutcome::Reject { reason: "cash_reserve_breached".to_string() };
        }
        let adjusted_quantity = (spendable / order.price).floor();
        if adjusted_quantity < Decimal::ONE {
            RuleOutcome::Reject { reason: "cash_reserve_breached".to_string() }
        } else {
            RuleOutcome::Adjust { adjusted_quantity, reason: "cash_reserve_capped".to_string() }
        }
    }
}

pub struct TradeFrequencyRule {
    pub max_orders_per_day: u32,
}
impl RiskRule for TradeFrequencyRule {
    fn name(&self) -> &'static str {
        "TradeFrequency"
    }
    fn evaluate(&self, _order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        if ctx.orders_today < self.max_orders_per_day {
            RuleOutcome::Approve
        } else {
            RuleOutcome::Reject { reason: "max_orders_per_day_exceeded".to_string() }
        }
    }
}

pub struct ConsecutiveLossRule {
    pub max_consec_losses: u32,
}
impl RiskRule for ConsecutiveLossRule {
    fn name(&self) -> &'static str {
        "ConsecutiveLoss"
    }
    fn evaluate(&self, _order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        if ctx.consecutive_losing_trades < self.max_consec_losses {
            RuleOutcome::Approve
        } else {
            RuleOutcome::Reject { reason: "consecutive_loss_limit_exceeded".to_string() }
        }
    }
}

pub struct TotalExposureRule {
    pub max_total_exposure: Decimal,
}
impl RiskRule for TotalExposureRule {
    fn name(&self) -> &'static str {
        "TotalExposure"
    }
    fn evaluate(&self, order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        if ctx.portfolio_value.is_zero() {
            return RuleOutcome::Reject { reason: "portfolio_value is zero".to_string() };
        }
        let projected = ctx.total_notional + order.notional();
        if projected / ctx.portfolio_value <= self.max_total_exposure {
            RuleOutcome::Approve
        } else {
            RuleOutcome::Reject { reason: "total_exposure_exceeded".to_string() }
        }
    }
}

pub struct OrderValueBoundsRule {
    pub min_order_value: Decimal,
    pub max_order_value: Decimal,
}
impl RiskRule for OrderValueBoundsRule {
    fn name(&self) -> &'static str {
        "OrderValueBounds"
    }
    fn evaluate(&self, order: &IntendedOrder, _ctx: &RiskContext) -> RuleOutcome {
        let notional = order.notional();
        if notional >= self.min_order_value && notional <= self.max_order_value {
            RuleOutcome::Approve
        } else {
            RuleOutcome::Reject { reason: "order_value_out_of_bounds".to_string() }
        }
    }
}

pub struct EmergencyStopRule;
impl RiskRule for EmergencyStopRule {
    fn name(&self) -> &'static str {
        "EmergencyStop"
    }
    fn evaluate(&self, _order: &IntendedOrder, ctx: &RiskContext) -> RuleOutcome {
        if ctx.emergency_stop_armed {
            RuleOutcome::Reject { reason: "emergency_stop_armed".to_string() }
        } else {
            RuleOutcome::Approve
        }
    }
}

/// The fixed ten-rule chain (spec.md §4.G.1). Rules run in table order;
/// the first non-APPROVE outcome wins and short-circuits the rest.
pub struct RiskRuleChain {
    rules: Vec<Box<dyn RiskRule>>,
}

impl RiskRuleChain {
    pub fn from_config(config: &RiskConfig) -> Self {
        Self {
            rules: vec![
                Box::new(PositionSizeRule { max_position_ratio: config.max_position_ratio }),
                Box::new(SectorExposureRule { max_sector_ratio: config.max_sector_ratio }),
                Box::new(DailyLossRule { max_daily_loss: config.max_daily_loss }),
                Box::new(MonthlyLossRule { max_monthly_loss: config.max_monthly_loss }),
                Box::new(CashReserveRule { min_cash_reserve_ratio: config.min_cash_reserve_ratio }),
                Box::new(TradeFrequencyRule { max_orders_per_day: config.max_orders_per_day }),
                Box::new(ConsecutiveLossRule { max_consec_losses: config.max_consec_losses }),
                Box::new(TotalExposureRule { max_total_exposure: config.max_total_exposure }),
                Box::new(OrderValueBoundsRule { min_order_value: config.min_order_value, max_order_value: config.max_order_value }),
                Box::new(EmergencyStopRule),
            ],
        }
    }

    pub fn evaluate(&self, order: &IntendedOrder, ctx: &RiskContext) -> RiskCheckResult {
        for rule in &self.rules {
            match rule.evaluate(order, ctx) {
                RuleOutcome::Approve => continue,
                RuleOutcome::Adjust { adjusted_quantity, reason } => {
                    return RiskCheckResult {
                        decision: Decision::Adjust,
                        adjusted_quantity: Some(adjusted_quantity),
                        reasons: vec![format!("{}:{}", rule.name(), reason)],
                    };
                }
                RuleOutcome::Reject { reason } => {
                    return RiskCheckResult {
                        decision: Decision::Reject,
                        adjusted_quantity: None,
                        reasons: vec![format!("{}:{}", rule.name(), reason)],
                    };
                }
            }
        }
        RiskCheckResult { decision: Decision::Approve, adjusted_quantity: None, reasons: Vec::new() }
    }
}
