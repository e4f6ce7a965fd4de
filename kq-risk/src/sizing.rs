//! Position size recommender (spec.md §4.G.2): offered to strategies on
//! request, never places orders itself. Grounded on
//! `jackbot-execution/src/smart_router.rs`'s exposure-bounded sizing and
//! `jackbot-risk/src/volatility.rs`'s `VolatilityScaler` (base-vol-over-
//! actual-vol scale factor), extended with the three named modes.

use crate::config::SizingConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, Copy)]
pub enum SizingMode {
    /// `risk_per_trade = portfolio * r`; `size = risk_per_trade / (entry - stop)`.
    FixedFractional,
    /// Size inversely proportional to ATR: the fixed-fractional base size
    /// scaled by `base_atr / current_atr`, the way `VolatilityScaler`
    /// scales a base position size against baseline volatility. `base_atr`
    /// is the calibration baseline; `current_atr` is the symbol's ATR now.
    VolatilityBased { base_atr: Decimal, current_atr: Decimal },
    /// Bounded Kelly using a rolling win rate and payoff ratio.
    Kelly { win_rate: Decimal, avg_win: Decimal, avg_loss: Decimal },
}

pub struct PositionSizeRecommender {
    config: SizingConfig,
}

impl PositionSizeRecommender {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Recommends a quantity (floored to a whole share) for the given
    /// mode. Returns `Decimal::ZERO` if the inputs make sizing undefined
    /// (eg/ `entry == stop`, non-positive ATR) rather than erroring —
    /// callers treat zero as "no size recommended".
    pub fn recommend(&self, mode: SizingMode, portfolio_value: Decimal, entry_price: Decimal, stop_price: Decimal) -> Decimal {
        match mode {
            SizingMode::FixedFractional => self.fixed_fractional(portfolio_value, entry_price, stop_price),
            SizingMode::VolatilityBased { base_atr, current_atr } => self.volatility_based(portfolio_value, entry_price, base_atr, current_atr),
            SizingMode::Kelly { win_rate, avg_win, avg_loss } => self.kelly(portfolio_value, entry_price, win_rate, avg_win, avg_loss),
        }
    }

    fn fixed_fractional(&self, portfolio_value: Decimal, entry_price: Decimal, stop_price: Decimal) -> Decimal {
        let risk_per_share = (entry_price - stop_price).abs();
        if risk_per_share.is_zero() {
            return Decimal::ZERO;
        }
        let risk_per_trade = portfolio_value * self.config.fixed_fractional_risk_pct;
        (risk_per_trade / risk_per_share).floor().max(Decimal::ZERO)
    }

    /// `base_atr` is the baseline ATR the risk budget is calibrated
    /// against; the resulting size scales inversely with the symbol's
    /// current ATR, exactly as `VolatilityScaler::adjust_position` scales
    /// a base size by `base_volatility / volatility`.
    fn volatility_based(&self, portfolio_value: Decimal, entry_price: Decimal, base_atr: Decimal, current_atr: Decimal) -> Decimal {
        if current_atr.is_zero() || entry_price.is_zero() || base_atr.is_zero() {
            return Decimal::ZERO;
        }
        let risk_budget = portfolio_value * self.config.fixed_fractional_risk_pct;
        let base_size = risk_budget / entry_price;
        (base_size * (base_atr / current_atr)).floor().max(Decimal::ZERO)
    }

    /// Bounded Kelly fraction `f* = w - (1-w)/b` where `b = avg_win/avg_loss`,
    /// clamped to `[0, kelly_cap]` before being applied to the portfolio
    /// value. An unfavourable edge (`f* <= 0`) recommends zero size.
    fn kelly(&self, portfolio_value: Decimal, entry_price: Decimal, win_rate: Decimal, avg_win: Decimal, avg_loss: Decimal) -> Decimal {
        if avg_loss.is_zero() || entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let payoff_ratio = avg_win / avg_loss;
        if payoff_ratio.is_zero() {
            return Decimal::ZERO;
        }
        let kelly_fraction = win_rate - (Decimal::ONE - win_rate) / payoff_ratio;
        let bounded = kelly_fraction.clamp(Decimal::ZERO, self.config.kelly_cap);
        ((portfolio_value * bounded) / entry_price).floor()
    }
}

impl Default for PositionSizeRecommender {
    fn default() -> Self {
        Self::new(SizingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_fractional_sizes_to_the_configured_risk_budget() {
        let recommender = PositionSizeRecommender::new(SizingConfig { fixed_fractional_risk_pct: dec!(0.01), kelly_cap: dec!(0.5) });
        // risk budget = 10_000_000 * 0.01 = 100_000; risk/share = 75_000 - 73_500 = 1_500.
        let qty = recommender.recommend(SizingMode::FixedFractional, dec!(10_000_000), dec!(75_000), dec!(73_500));
        assert_eq!(qty, dec!(66));
    }

    #[test]
    fn fixed_fractional_is_zero_when_entry_equals_stop() {
        let recommender = PositionSizeRecommender::default();
        let qty = recommender.recommend(SizingMode::FixedFractional, dec!(10_000_000), dec!(75_000), dec!(75_000));
        assert_eq!(qty, Decimal::ZERO);
    }

    #[test]
    fn volatility_based_size_shrinks_as_current_atr_rises_above_the_baseline() {
        let recommender = PositionSizeRecommender::new(SizingConfig { fixed_fractional_risk_pct: dec!(0.01), kelly_cap: dec!(0.5) });
        // base_size = 10_000_000 * 0.01 / 75_000 = 1.333...
        let at_baseline = recommender.recommend(
            SizingMode::VolatilityBased { base_atr: dec!(500), current_atr: dec!(500) },
            dec!(10_000_000),
            dec!(75_000),
            dec!(0),
        );
        let ten_times_more_volatile = recommender.recommend(
            SizingMode::VolatilityBased { base_atr: dec!(500), current_atr: dec!(5_000) },
            dec!(10_000_000),
            dec!(75_000),
            dec!(0),
        );
        assert!(ten_times_more_volatile < at_baseline);
        assert_eq!(ten_times_more_volatile, Decimal::ZERO);

        let half_as_volatile = recommender.recommend(
            SizingMode::VolatilityBased { base_atr: dec!(500), current_atr: dec!(250) },
            dec!(10_000_000),
            dec!(75_000),
            dec!(0),
        );
        assert!(half_as_volatile > at_baseline);
    }

    #[test]
    fn kelly_recommends_zero_on_an_unfavourable_edge() {
        let recommender = PositionSizeRecommender::default();
        let qty = recommender.recommend(
            SizingMode::Kelly { win_rate: dec!(0.3), avg_win: dec!(1), avg_loss: dec!(2) },
            dec!(10_000_000),
            dec!(75_000),
            dec!(0),
        );
        assert_eq!(qty, Decimal::ZERO);
    }

    #[test]
    fn kelly_is_bounded_by_the_configured_cap() {
        let recommender = PositionSizeRecommender::new(SizingConfig { fixed_fractional_risk_pct: dec!(0.01), kelly_cap: dec!(0.2) });
        // Extremely favourable edge would otherwise recommend a huge fraction.
        let qty = recommender.recommend(
            SizingMode::Kelly { win_rate: dec!(0.9), avg_win: dec!(3), avg_loss: dec!(1) },
            dec!(10_000_000),
            dec!(75_000),
            dec!(0),
        );
        // capped at 0.2 * 10_000_000 / 75_000 = 26.67 -> 26
        assert_eq!(qty, dec!(26));
    }
}
