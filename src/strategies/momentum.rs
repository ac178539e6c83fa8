// src/strategies/momentum.rs
use crate::error::StrategyError;
use crate::strategies::traits::Strategy;
use crate::types::{Candle, Position, Signal, SignalAction};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Rides the rate of change over `lookback` candles: buys when it rises above
/// `threshold_pct`, sells when it falls below `-threshold_pct`.
pub struct Momentum {
    name: String,
    lookback: usize,
    threshold_pct: f64,
}

impl Momentum {
    /// `threshold_pct` is a fraction (0.005 for 0.5%).
    pub fn new(lookback: usize, threshold_pct: f64) -> Result<Self, StrategyError> {
        if lookback < 2 {
            return Err(StrategyError::InvalidParameters(
                "momentum lookback must be at least 2".into(),
            ));
        }
        if !(threshold_pct >= 0.0) {
            return Err(StrategyError::InvalidParameters(format!(
                "momentum threshold must be non-negative, got {}",
                threshold_pct
            )));
        }
        Ok(Self {
            name: format!("momentum({})", lookback),
            lookback,
            threshold_pct,
        })
    }
}

impl Strategy for Momentum {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_window(&self) -> usize {
        self.lookback
    }

    fn decide(&self, window: &[Candle], _position: &Position) -> Signal {
        let first = &window[window.len() - self.lookback];
        let last = &window[window.len() - 1];
        if first.close <= Decimal::ZERO {
            return Signal::hold(last);
        }
        let change = (last.close / first.close - Decimal::ONE)
            .to_f64()
            .unwrap_or(0.0);

        let strength = if self.threshold_pct > 0.0 {
            (change.abs() / (2.0 * self.threshold_pct)).min(1.0)
        } else {
            1.0
        };
        if change > self.threshold_pct {
            Signal::new(last, SignalAction::Buy, strength)
        } else if change < -self.threshold_pct {
            Signal::new(last, SignalAction::Sell, strength)
        } else {
            Signal::hold(last)
        }
    }
}
