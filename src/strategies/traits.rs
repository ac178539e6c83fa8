// src/strategies/traits.rs
use crate::error::StrategyError;
use crate::types::{Candle, Position, Signal};

/// A trading strategy: a pure function from a candle window and the current
/// position to a signal.
///
/// Implementations must not keep state between calls or perform I/O. Live
/// trading and backtests call the exact same `evaluate`, and that is what
/// makes their results comparable.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Candles needed before `decide` is consulted.
    fn min_window(&self) -> usize;

    /// Called with at least `min_window()` candles, most recent last.
    fn decide(&self, window: &[Candle], position: &Position) -> Signal;

    /// Empty windows are an error; short ones yield `Hold` with zero confidence.
    fn evaluate(&self, window: &[Candle], position: &Position) -> Result<Signal, StrategyError> {
        let last = window.last().ok_or(StrategyError::InsufficientData {
            required: self.min_window(),
            got: 0,
        })?;
        if window.len() < self.min_window() {
            return Ok(Signal::hold(last));
        }
        Ok(self.decide(window, position))
    }
}

pub type BoxedStrategy = Box<dyn Strategy>;

/// Closing prices as f64 for the `ta` indicators.
pub(crate) fn closes(window: &[Candle]) -> Vec<f64> {
    use rust_decimal::prelude::ToPrimitive;
    window
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(0.0))
        .collect()
}
