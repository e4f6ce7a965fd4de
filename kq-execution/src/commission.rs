//! Korean equities commission and tax schedule (spec.md §4.H.6). A pure
//! function module grounded on the teacher's `Fees`/`calculate_total_fees`
//! shape (`src/execution/fill.rs`, `src/execution/simulated.rs`), extended
//! with the Korean tax lines and `Decimal` banker's-rounding to the won.

use kq_instrument::Side;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// `commission_rates` (spec.md §6): brokerage/exchange/clearing/tx_tax/
/// rural_tax, all configurable fractions of notional.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommissionConfig {
    pub brokerage_rate: Decimal,
    pub min_brokerage_fee: Decimal,
    pub exchange_rate: Decimal,
    pub clearing_rate: Decimal,
    pub tx_tax_rate: Decimal,
    pub rural_tax_rate: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            brokerage_rate: dec!(0.00015),
            min_brokerage_fee: dec!(100),
            exchange_rate: dec!(0.000023),
            clearing_rate: dec!(0.000005),
            tx_tax_rate: dec!(0.0018),
            rural_tax_rate: dec!(0.0015),
        }
    }
}

/// Breakdown of one fill's total commission (spec.md §4.H.6). `total()` is
/// what gets charged against cash/P&L; the per-line fields exist so tests
/// and audit logging can verify the formula component by component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommissionBreakdown {
    pub brokerage_fee: Decimal,
    pub exchange_fee: Decimal,
    pub clearing_fee: Decimal,
    pub tx_tax: Decimal,
    pub rural_tax: Decimal,
}

impl CommissionBreakdown {
    pub fn total(&self) -> Decimal {
        (self.brokerage_fee + self.exchange_fee + self.clearing_fee + self.tx_tax + self.rural_tax)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
    }
}

/// Computes the full commission/tax breakdown for one fill of notional
/// `N = price * qty` (spec.md §4.H.6). Sell-side fills additionally carry
/// the securities transaction tax and the rural special tax; buy-side
/// fills carry neither.
pub fn calculate(side: Side, notional: Decimal) -> CommissionBreakdown {
    calculate_with(side, notional, &CommissionConfig::default())
}

pub fn calculate_with(side: Side, notional: Decimal, config: &CommissionConfig) -> CommissionBreakdown {
    let brokerage_fee = (notional * config.brokerage_rate).max(config.min_brokerage_fee);
    let exchange_fee = notional * config.exchange_rate;
    let clearing_fee = notional * config.clearing_rate;
    let (tx_tax, rural_tax) = match side {
        Side::Sell => (notional * config.tx_tax_rate, notional * config.rural_tax_rate),
        Side::Buy => (Decimal::ZERO, Decimal::ZERO),
    };
    CommissionBreakdown {
        brokerage_fee: round_won(brokerage_fee),
        exchange_fee: round_won(exchange_fee),
        clearing_fee: round_won(clearing_fee),
        tx_tax: round_won(tx_tax),
        rural_tax: round_won(rural_tax),
    }
}

fn round_won(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_fills_carry_no_transaction_tax() {
        let breakdown = calculate(Side::Buy, dec!(750_000));
        assert_eq!(breakdown.tx_tax, Decimal::ZERO);
        assert_eq!(breakdown.rural_tax, Decimal::ZERO);
    }

    #[test]
    fn sell_fills_carry_both_korean_taxes() {
        let breakdown = calculate(Side::Sell, dec!(750_000));
        assert!(breakdown.tx_tax > Decimal::ZERO);
        assert!(breakdown.rural_tax > Decimal::ZERO);
        // 750_000 * 0.0018 = 1350
        assert_eq!(breakdown.tx_tax, dec!(1350));
    }

    #[test]
    fn brokerage_fee_floors_at_the_configured_minimum() {
        let breakdown = calculate(Side::Buy, dec!(1000));
        assert_eq!(breakdown.brokerage_fee, dec!(100));
    }

    #[test]
    fn total_is_the_sum_of_every_line_rounded_to_the_won() {
        let breakdown = calculate(Side::Sell, dec!(750_000));
        let expected = breakdown.brokerage_fee + breakdown.exchange_fee + breakdown.clearing_fee + breakdown.tx_tax + breakdown.rural_tax;
        assert_eq!(breakdown.total(), expected.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven));
    }
}
