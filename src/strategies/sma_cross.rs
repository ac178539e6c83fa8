// src/strategies/sma_cross.rs
use crate::error::StrategyError;
use crate::strategies::traits::{closes, Strategy};
use crate::types::{Candle, Position, Signal, SignalAction};
use ta::indicators::SimpleMovingAverage;
use ta::Next;

/// Buys when the short SMA crosses above the long SMA and sells on the
/// opposite cross.
///
/// The cross is detected by comparing the last candle against the window
/// without it, so no state is carried between evaluations.
pub struct SmaCross {
    name: String,
    short: SimpleMovingAverage,
    long: SimpleMovingAverage,
    short_window: usize,
    long_window: usize,
}

impl SmaCross {
    pub fn new(short_window: usize, long_window: usize) -> Result<Self, StrategyError> {
        if long_window <= short_window {
            return Err(StrategyError::InvalidParameters(format!(
                "long_window ({}) must be greater than short_window ({})",
                long_window, short_window
            )));
        }
        let invalid = |e: ta::errors::TaError| StrategyError::InvalidParameters(format!("{:?}", e));
        Ok(Self {
            name: format!("sma_cross({},{})", short_window, long_window),
            short: SimpleMovingAverage::new(short_window).map_err(invalid)?,
            long: SimpleMovingAverage::new(long_window).map_err(invalid)?,
            short_window,
            long_window,
        })
    }

    /// (short, long) averages over the tail of `closes`.
    fn averages(&self, closes: &[f64]) -> (f64, f64) {
        // clones start from empty indicator state
        let mut short = self.short.clone();
        let mut long = self.long.clone();
        let s = closes[closes.len() - self.short_window..]
            .iter()
            .fold(0.0, |_, c| short.next(*c));
        let l = closes[closes.len() - self.long_window..]
            .iter()
            .fold(0.0, |_, c| long.next(*c));
        (s, l)
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_window(&self) -> usize {
        self.long_window + 1
    }

    fn decide(&self, window: &[Candle], _position: &Position) -> Signal {
        let closes = closes(window);
        let (prev_short, prev_long) = self.averages(&closes[..closes.len() - 1]);
        let (short, long) = self.averages(&closes);

        let last = &window[window.len() - 1];
        let was_above = prev_short > prev_long;
        let is_above = short > long;
        let confidence = if long > 0.0 {
            ((short - long).abs() / long * 100.0).min(1.0)
        } else {
            0.0
        };

        match (was_above, is_above) {
            (false, true) => Signal::new(last, SignalAction::Buy, confidence),
            (true, false) => Signal::new(last, SignalAction::Sell, confidence),
            _ => Signal::hold(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::closes as candles;
    use rust_decimal::Decimal;

    fn prices(raw: &[i64]) -> Vec<Candle> {
        let p: Vec<Decimal> = raw.iter().map(|v| Decimal::from(*v)).collect();
        candles("BTCUSDT", &p)
    }

    #[test]
    fn rejects_inverted_windows() {
        assert!(SmaCross::new(5, 5).is_err());
        assert!(SmaCross::new(0, 3).is_err());
    }

    #[test]
    fn detects_upward_cross() {
        let s = SmaCross::new(2, 4).unwrap();
        let window = prices(&[10, 9, 8, 7, 12]);
        let signal = s.evaluate(&window, &Position::flat("BTCUSDT")).unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence > 0.0);
    }

    #[test]
    fn detects_downward_cross() {
        let s = SmaCross::new(2, 4).unwrap();
        let window = prices(&[7, 8, 9, 10, 5]);
        let signal = s.evaluate(&window, &Position::flat("BTCUSDT")).unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[test]
    fn steady_trend_holds_and_is_repeatable() {
        let s = SmaCross::new(2, 4).unwrap();
        let window = prices(&[1, 2, 3, 4, 5, 6]);
        let a = s.evaluate(&window, &Position::flat("BTCUSDT")).unwrap();
        let b = s.evaluate(&window, &Position::flat("BTCUSDT")).unwrap();
        assert_eq!(a.action, SignalAction::Hold);
        assert_eq!(a, b);
    }

    #[test]
    fn short_window_holds_with_zero_confidence() {
        let s = SmaCross::new(2, 4).unwrap();
        let signal = s.evaluate(&prices(&[1, 2, 3]), &Position::flat("BTCUSDT")).unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn empty_window_is_an_error() {
        let s = SmaCross::new(2, 4).unwrap();
        assert!(matches!(
            s.evaluate(&[], &Position::flat("BTCUSDT")),
            Err(StrategyError::InsufficientData { required: 5, got: 0 })
        ));
    }
}
