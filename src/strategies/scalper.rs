// src/strategies/scalper.rs
use crate::error::StrategyError;
use crate::strategies::traits::Strategy;
use crate::types::{Candle, Position, Signal, SignalAction};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Buys a dip of `target_drop_pct` below the recent high when flat, and
/// sells once the close is `target_profit_pct` above the average entry.
pub struct SimpleScalper {
    name: String,
    lookback: usize,
    target_drop_pct: Decimal,
    target_profit_pct: Decimal,
}

impl SimpleScalper {
    /// Creates a new SimpleScalper strategy.
    ///
    /// # Arguments
    /// * `lookback` - Candles scanned for the recent high that serves as baseline.
    /// * `target_drop_pct` - Drop below the recent high that triggers a BUY (e.g., 0.02 for 2%).
    /// * `target_profit_pct` - Gain over the average entry that triggers a SELL (e.g., 0.03 for 3%).
    pub fn new(
        lookback: usize,
        target_drop_pct: f64,
        target_profit_pct: f64,
    ) -> Result<Self, StrategyError> {
        let pct = |v: f64, what: &str| {
            Decimal::from_f64(v)
                .filter(|d| *d > Decimal::ZERO && *d < Decimal::ONE)
                .ok_or_else(|| {
                    StrategyError::InvalidParameters(format!("{} must be in (0, 1), got {}", what, v))
                })
        };
        if lookback == 0 {
            return Err(StrategyError::InvalidParameters("scalper lookback must be positive".into()));
        }
        Ok(Self {
            name: format!("scalper({})", lookback),
            lookback,
            target_drop_pct: pct(target_drop_pct, "target_drop_pct")?,
            target_profit_pct: pct(target_profit_pct, "target_profit_pct")?,
        })
    }
}

impl Strategy for SimpleScalper {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_window(&self) -> usize {
        self.lookback
    }

    fn decide(&self, window: &[Candle], position: &Position) -> Signal {
        let recent = &window[window.len() - self.lookback..];
        let last = &recent[recent.len() - 1];
        let price = last.close;

        // No position -> look for a dip below the recent high
        if position.is_flat() {
            let baseline = recent.iter().map(|c| c.close).max().unwrap_or(price);
            let buy_target = baseline * (Decimal::ONE - self.target_drop_pct);
            if baseline > Decimal::ZERO && price <= buy_target {
                let depth = ((baseline - price) / baseline / self.target_drop_pct)
                    .to_f64()
                    .unwrap_or(1.0);
                return Signal::new(last, SignalAction::Buy, depth / 2.0);
            }
        }
        // Holding -> look for profit over the average cost basis
        else if position.is_long() {
            let sell_target = position.avg_entry_price * (Decimal::ONE + self.target_profit_pct);
            if price >= sell_target {
                return Signal::new(last, SignalAction::Sell, 1.0);
            }
        }

        Signal::hold(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::closes;
    use rust_decimal_macros::dec;

    #[test]
    fn buys_the_dip_when_flat() {
        let s = SimpleScalper::new(3, 0.02, 0.03).unwrap();
        let window = closes("BTCUSDT", &[dec!(100), dec!(99), dec!(97.5)]);
        let signal = s.evaluate(&window, &Position::flat("BTCUSDT")).unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
    }

    #[test]
    fn takes_profit_over_entry() {
        let s = SimpleScalper::new(3, 0.02, 0.03).unwrap();
        let mut pos = Position::flat("BTCUSDT");
        pos.quantity = dec!(1);
        pos.avg_entry_price = dec!(100);

        let window = closes("BTCUSDT", &[dec!(101), dec!(102), dec!(103)]);
        assert_eq!(s.evaluate(&window, &pos).unwrap().action, SignalAction::Sell);

        let window = closes("BTCUSDT", &[dec!(101), dec!(102), dec!(102.5)]);
        assert_eq!(s.evaluate(&window, &pos).unwrap().action, SignalAction::Hold);
    }

    #[test]
    fn name_carries_lookback() {
        assert_eq!(SimpleScalper::new(20, 0.02, 0.03).unwrap().name(), "scalper(20)");
    }

    #[test]
    fn rejects_out_of_range_targets() {
        assert!(SimpleScalper::new(3, 0.0, 0.03).is_err());
        assert!(SimpleScalper::new(3, 0.02, 1.5).is_err());
    }
}
