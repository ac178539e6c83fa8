// src/strategies/exits.rs
use crate::strategies::traits::{BoxedStrategy, Strategy};
use crate::types::{Candle, Position, Signal, SignalAction};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Stop-loss / take-profit against the average entry price, layered over any
/// strategy. An exit overrides whatever the inner strategy says.
pub struct ProtectiveExits {
    inner: BoxedStrategy,
    name: String,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
}

impl ProtectiveExits {
    pub fn new(inner: BoxedStrategy, stop_loss_pct: Option<f64>, take_profit_pct: Option<f64>) -> Self {
        let name = format!("{}+exits", inner.name());
        Self {
            inner,
            name,
            stop_loss: stop_loss_pct.and_then(Decimal::from_f64),
            take_profit: take_profit_pct.and_then(Decimal::from_f64),
        }
    }
}

impl Strategy for ProtectiveExits {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_window(&self) -> usize {
        self.inner.min_window()
    }

    fn decide(&self, window: &[Candle], position: &Position) -> Signal {
        if position.is_long() {
            let last = &window[window.len() - 1];
            let entry = position.avg_entry_price;
            if let Some(sl) = self.stop_loss {
                if last.close <= entry * (Decimal::ONE - sl) {
                    return Signal::new(last, SignalAction::Sell, 1.0);
                }
            }
            if let Some(tp) = self.take_profit {
                if last.close >= entry * (Decimal::ONE + tp) {
                    return Signal::new(last, SignalAction::Sell, 1.0);
                }
            }
        }
        self.inner.decide(window, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::momentum::Momentum;
    use crate::types::fixtures::closes;
    use rust_decimal_macros::dec;

    fn long_at(price: Decimal) -> Position {
        let mut pos = Position::flat("BTCUSDT");
        pos.quantity = dec!(1);
        pos.avg_entry_price = price;
        pos
    }

    fn wrapped() -> ProtectiveExits {
        ProtectiveExits::new(Box::new(Momentum::new(2, 0.5).unwrap()), Some(0.02), Some(0.03))
    }

    #[test]
    fn stop_loss_and_take_profit_fire() {
        let s = wrapped();
        let down = closes("BTCUSDT", &[dec!(99), dec!(97.9)]);
        assert_eq!(s.evaluate(&down, &long_at(dec!(100))).unwrap().action, SignalAction::Sell);

        let up = closes("BTCUSDT", &[dec!(101), dec!(103)]);
        assert_eq!(s.evaluate(&up, &long_at(dec!(100))).unwrap().action, SignalAction::Sell);
    }

    #[test]
    fn defers_to_inner_inside_band() {
        let s = wrapped();
        let window = closes("BTCUSDT", &[dec!(100), dec!(101)]);
        assert_eq!(s.evaluate(&window, &long_at(dec!(100))).unwrap().action, SignalAction::Hold);
        assert_eq!(s.min_window(), 2);
    }
}
