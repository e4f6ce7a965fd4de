use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Parameters for the configured indicator set (spec.md §4.E, `indicator_periods`
/// configuration key). Defaults match the spec's "at minimum" list.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AnalyzerConfig {
    pub sma_periods: Vec<usize>,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: Decimal,
    pub stochastic_period: usize,
    pub stochastic_d_period: usize,
    pub atr_period: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sma_periods: vec![5, 20],
            ema_fast: 12,
            ema_slow: 26,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_k: dec!(2),
            stochastic_period: 14,
            stochastic_d_period: 3,
            atr_period: 14,
        }
    }
}
