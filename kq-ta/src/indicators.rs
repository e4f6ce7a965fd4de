//! Incremental indicator primitives (spec.md §4.E). Each struct mirrors
//! the teacher's update-in-place shape (`jackbot-ta::indicators::{
//! SimpleMovingAverage, ExponentialMovingAverage}`), extended in the same
//! idiom to RSI/MACD/Bollinger/Stochastic/ATR. Every `update` returns
//! `None` while its window hasn't filled — absence, never zero, per
//! spec.md §4.E ("indicator value is absent, not zero").

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;

/// Simple moving average over the last `period` values.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<Decimal>,
    sum: Decimal,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self { period, window: VecDeque::with_capacity(period), sum: Decimal::ZERO }
    }

    pub fn update(&mut self, value: Decimal) -> Option<Decimal> {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        if self.window.len() < self.period {
            return None;
        }
        Some(self.sum / Decimal::from(self.period as u64))
    }
}

/// Exponential moving average, seeded with the SMA of its first `period`
/// values and smoothed thereafter with `α = 2/(period+1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: Decimal,
    seed: Sma,
    value: Option<Decimal>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: Decimal::from(2u64) / Decimal::from(period as u64 + 1),
            seed: Sma::new(period),
            value: None,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        match self.value {
            Some(v) => {
                let next = (price - v) * self.alpha + v;
                self.value = Some(next);
                Some(next)
            }
            None => {
                let seeded = self.seed.update(price)?;
                self.value = Some(seeded);
                Some(seeded)
            }
        }
    }
}

/// Wilder-smoothed RSI over `period` changes (spec.md §4.E: "Wilder's
/// smoothing for RSI and ATR").
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<Decimal>,
    sum_gain: Decimal,
    sum_loss: Decimal,
    warm_count: usize,
    avg_gain: Option<Decimal>,
    avg_loss: Option<Decimal>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            sum_gain: Decimal::ZERO,
            sum_loss: Decimal::ZERO,
            warm_count: 0,
            avg_gain: None,
            avg_loss: None,
        }
    }

    pub fn update(&mut self, close: Decimal) -> Option<Decimal> {
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };
        let change = close - prev;
        let gain = change.max(Decimal::ZERO);
        let loss = (-change).max(Decimal::ZERO);

        let (avg_gain, avg_loss) = match (self.avg_gain, self.avg_loss) {
            (Some(ag), Some(al)) => {
                let period = Decimal::from(self.period as u64);
                let next_gain = (ag * (period - Decimal::ONE) + gain) / period;
                let next_loss = (al * (period - Decimal::ONE) + loss) / period;
                self.avg_gain = Some(next_gain);
                self.avg_loss = Some(next_loss);
                (next_gain, next_loss)
            }
            _ => {
                self.sum_gain += gain;
                self.sum_loss += loss;
                self.warm_count += 1;
                if self.warm_count < self.period {
                    return None;
                }
                let period = Decimal::from(self.period as u64);
                let ag = self.sum_gain / period;
                let al = self.sum_loss / period;
                self.avg_gain = Some(ag);
                self.avg_loss = Some(al);
                (ag, al)
            }
        };

        if avg_loss.is_zero() {
            return Some(dec!(100));
        }
        let rs = avg_gain / avg_loss;
        Some(dec!(100) - dec!(100) / (Decimal::ONE + rs))
    }
}

/// Wilder-smoothed Average True Range.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<Decimal>,
    sum_tr: Decimal,
    warm_count: usize,
    avg_tr: Option<Decimal>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            sum_tr: Decimal::ZERO,
            warm_count: 0,
            avg_tr: None,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<Decimal> {
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };
        let tr = (high - low).max((high - prev).abs()).max((low - prev).abs());

        match self.avg_tr {
            Some(avg) => {
                let period = Decimal::from(self.period as u64);
                let next = (avg * (period - Decimal::ONE) + tr) / period;
                self.avg_tr = Some(next);
                Some(next)
            }
            None => {
                self.sum_tr += tr;
                self.warm_count += 1;
                if self.warm_count < self.period {
                    return None;
                }
                let avg = self.sum_tr / Decimal::from(self.period as u64);
                self.avg_tr = Some(avg);
                Some(avg)
            }
        }
    }
}

/// MACD line, signal line and histogram (12/26/9 default per spec.md §4.E).
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast: Ema::new(fast_period),
            slow: Ema::new(slow_period),
            signal: Ema::new(signal_period),
        }
    }

    pub fn update(&mut self, close: Decimal) -> Option<MacdValue> {
        let fast = self.fast.update(close)?;
        let slow = self.slow.update(close)?;
        let macd_line = fast - slow;
        let signal = self.signal.update(macd_line)?;
        Some(MacdValue { macd: macd_line, signal, histogram: macd_line - signal })
    }
}

/// Bollinger bands over `period` closes at `k` standard deviations.
#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    k: Decimal,
    window: VecDeque<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerValue {
    pub lower: Decimal,
    pub mid: Decimal,
    pub upper: Decimal,
}

impl Bollinger {
    pub fn new(period: usize, k: Decimal) -> Self {
        Self { period, k, window: VecDeque::with_capacity(period) }
    }

    pub fn update(&mut self, close: Decimal) -> Option<BollingerValue> {
        self.window.push_back(close);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }
        let n = Decimal::from(self.period as u64);
        let mean = self.window.iter().sum::<Decimal>() / n;
        let variance = self.window.iter().map(|v| (*v - mean) * (*v - mean)).sum::<Decimal>() / n;
        let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);
        Some(BollingerValue {
            lower: mean - self.k * std_dev,
            mid: mean,
            upper: mean + self.k * std_dev,
        })
    }
}

/// Stochastic oscillator: `%K` over `period` highs/lows, `%D` the
/// `d_period`-SMA of `%K`.
#[derive(Debug, Clone)]
pub struct Stochastic {
    period: usize,
    highs: VecDeque<Decimal>,
    lows: VecDeque<Decimal>,
    d: Sma,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticValue {
    pub k: Decimal,
    pub d: Decimal,
}

impl Stochastic {
    pub fn new(period: usize, d_period: usize) -> Self {
        Self {
            period,
            highs: VecDeque::with_capacity(period),
            lows: VecDeque::with_capacity(period),
            d: Sma::new(d_period),
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<StochasticValue> {
        self.highs.push_back(high);
        self.lows.push_back(low);
        if self.highs.len() > self.period {
            self.highs.pop_front();
            self.lows.pop_front();
        }
        if self.highs.len() < self.period {
            return None;
        }
        let highest = self.highs.iter().copied().fold(Decimal::MIN, Decimal::max);
        let lowest = self.lows.iter().copied().fold(Decimal::MAX, Decimal::min);
        let range = highest - lowest;
        let k = if range.is_zero() {
            dec!(50)
        } else {
            (close - lowest) / range * dec!(100)
        };
        let d = self.d.update(k)?;
        Some(StochasticValue { k, d })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_is_absent_until_the_window_fills() {
        let mut sma = Sma::new(5);
        for close in [dec!(1), dec!(2), dec!(3), dec!(4)] {
            assert!(sma.update(close).is_none());
        }
        assert_eq!(sma.update(dec!(5)), Some(dec!(3)));
    }

    #[test]
    fn sma_matches_scenario_1_from_spec() {
        let mut sma = Sma::new(5);
        let closes = [dec!(74900), dec!(74950), dec!(75000), dec!(75050), dec!(75100)];
        let mut last = None;
        for c in closes {
            last = sma.update(c);
        }
        assert_eq!(last, Some(dec!(75000)));
    }

    #[test]
    fn rsi_is_absent_for_the_first_period_samples() {
        let mut rsi = Rsi::new(14);
        let mut last = None;
        for i in 0..14 {
            last = rsi.update(Decimal::from(100 + i));
        }
        assert!(last.is_none());
        let value = rsi.update(Decimal::from(115)).unwrap();
        assert!(value > dec!(0) && value <= dec!(100));
    }

    #[test]
    fn rsi_of_a_strictly_increasing_series_saturates_near_one_hundred() {
        let mut rsi = Rsi::new(14);
        let mut last = None;
        for i in 0..30 {
            last = rsi.update(Decimal::from(100 + i));
        }
        assert_eq!(last, Some(dec!(100)));
    }

    #[test]
    fn atr_is_absent_until_warm() {
        let mut atr = Atr::new(14);
        let mut last = None;
        for i in 0..14 {
            let base = Decimal::from(100 + i);
            last = atr.update(base + dec!(2), base - dec!(2), base);
        }
        assert!(last.is_none());
        assert!(atr.update(dec!(116), dec!(112), dec!(114)).is_some());
    }

    #[test]
    fn bollinger_bands_are_symmetric_around_the_mean() {
        let mut bb = Bollinger::new(3, dec!(2));
        bb.update(dec!(10));
        bb.update(dec!(10));
        let value = bb.update(dec!(10)).unwrap();
        assert_eq!(value.mid, dec!(10));
        assert_eq!(value.lower, dec!(10));
        assert_eq!(value.upper, dec!(10));
    }

    #[test]
    fn macd_requires_the_slow_ema_and_signal_to_warm_up() {
        let mut macd = Macd::new(3, 5, 2);
        let mut last = None;
        for i in 0..10 {
            last = macd.update(Decimal::from(100 + i));
        }
        assert!(last.is_some());
    }
}
