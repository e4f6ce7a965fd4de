use kq_instrument::{Sector, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;

/// Thresholds for the ten synchronous rules (spec.md §4.G.1, §6 config
/// table). All fractions are expressed as `0 < x <= 1` decimals.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RiskConfig {
    pub max_position_ratio: Decimal,
    pub max_sector_ratio: Decimal,
    pub max_daily_loss: Decimal,
    pub max_monthly_loss: Decimal,
    pub min_cash_reserve_ratio: Decimal,
    pub max_orders_per_day: u32,
    pub max_consec_losses: u32,
    pub max_total_exposure: Decimal,
    pub min_order_value: Decimal,
    pub max_order_value: Decimal,

    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_offset_pct: Decimal,
    pub break_even_profit_pct: Decimal,

    pub risk_check_timeout_ms: u64,

    /// `symbol -> sector` classification used by `SectorExposureRule` and
    /// the portfolio monitor's sector dispersion metric. Sourced from
    /// configuration rather than an instrument master (kq-instrument's
    /// `Sector` doc comment).
    #[serde(default)]
    pub sector_map: HashMap<Symbol, Sector>,

    pub emergency: EmergencyStopConfig,
    pub monitor: MonitorConfig,
    pub sizing: SizingConfig,
}

impl RiskConfig {
    pub fn risk_check_timeout(&self) -> Duration {
        Duration::from_millis(self.risk_check_timeout_ms)
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_ratio: dec!(0.10),
            max_sector_ratio: dec!(0.30),
            max_daily_loss: dec!(500_000),
            max_monthly_loss: dec!(5_000_000),
            min_cash_reserve_ratio: dec!(0.10),
            max_orders_per_day: 200,
            max_consec_losses: 5,
            max_total_exposure: dec!(0.80),
            min_order_value: dec!(10_000),
            max_order_value: dec!(50_000_000),
            stop_loss_pct: dec!(0.03),
            take_profit_pct: dec!(0.06),
            trailing_offset_pct: dec!(0.02),
            break_even_profit_pct: dec!(0.02),
            risk_check_timeout_ms: 500,
            sector_map: HashMap::new(),
            emergency: EmergencyStopConfig::default(),
            monitor: MonitorConfig::default(),
            sizing: SizingConfig::default(),
        }
    }
}

/// Arm conditions for the emergency stop (spec.md §4.G.2).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmergencyStopConfig {
    pub max_consecutive_losses: u32,
    pub upstream_down_secs: u64,
    pub position_stale_secs: u64,
    pub max_error_rate_per_min: u32,
    pub disarm_token: String,
}

impl Default for EmergencyStopConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: 5,
            upstream_down_secs: 30,
            position_stale_secs: 60,
            max_error_rate_per_min: 20,
            disarm_token: "changeme".to_string(),
        }
    }
}

/// Warning/critical thresholds for the periodic portfolio risk monitor
/// (spec.md §4.G.2 "Risk Monitor").
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub herfindahl_warning: Decimal,
    pub herfindahl_critical: Decimal,
    pub var_95_warning: Decimal,
    pub var_95_critical: Decimal,
    pub avg_correlation_warning: Decimal,
    pub avg_correlation_critical: Decimal,
    pub sector_dispersion_warning: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            herfindahl_warning: dec!(0.25),
            herfindahl_critical: dec!(0.40),
            var_95_warning: dec!(0.05),
            var_95_critical: dec!(0.10),
            avg_correlation_warning: dec!(0.60),
            avg_correlation_critical: dec!(0.80),
            sector_dispersion_warning: dec!(0.50),
        }
    }
}

/// Position size recommender parameters (spec.md §4.G.2).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SizingConfig {
    pub fixed_fractional_risk_pct: Decimal,
    pub kelly_cap: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self { fixed_fractional_risk_pct: dec!(0.01), kelly_cap: dec!(0.5) }
    }
}
