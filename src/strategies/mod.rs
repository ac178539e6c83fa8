// src/strategies/mod.rs
pub mod exits;
pub mod momentum;
pub mod scalper;
pub mod sma_cross;
pub mod traits;

use crate::config::{RiskConfig, StrategyConfig};
use crate::error::StrategyError;
use exits::ProtectiveExits;
use momentum::Momentum;
use scalper::SimpleScalper;
use sma_cross::SmaCross;
use traits::BoxedStrategy;

/// Builds the configured strategy, wrapped in protective exits when the risk
/// config sets a stop-loss or take-profit.
pub fn build_strategy(
    config: &StrategyConfig,
    risk: &RiskConfig,
) -> Result<BoxedStrategy, StrategyError> {
    let base: BoxedStrategy = match config {
        StrategyConfig::SmaCross {
            short_window,
            long_window,
        } => Box::new(SmaCross::new(*short_window, *long_window)?),
        StrategyConfig::Momentum {
            lookback,
            threshold_pct,
        } => Box::new(Momentum::new(*lookback, *threshold_pct)?),
        StrategyConfig::Scalper {
            lookback,
            target_drop_pct,
            target_profit_pct,
        } => Box::new(SimpleScalper::new(*lookback, *target_drop_pct, *target_profit_pct)?),
    };

    if risk.stop_loss_pct.is_none() && risk.take_profit_pct.is_none() {
        return Ok(base);
    }
    Ok(Box::new(ProtectiveExits::new(
        base,
        risk.stop_loss_pct,
        risk.take_profit_pct,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_with_exits_only_when_configured() {
        let mut risk = RiskConfig::default();
        let s = build_strategy(&StrategyConfig::default(), &risk).unwrap();
        assert_eq!(s.name(), "sma_cross(7,25)+exits");
        assert_eq!(s.min_window(), 26);

        risk.stop_loss_pct = None;
        risk.take_profit_pct = None;
        let s = build_strategy(&StrategyConfig::default(), &risk).unwrap();
        assert_eq!(s.name(), "sma_cross(7,25)");
    }

    #[test]
    fn invalid_parameters_surface() {
        let cfg = StrategyConfig::SmaCross {
            short_window: 25,
            long_window: 7,
        };
        assert!(build_strategy(&cfg, &RiskConfig::default()).is_err());
    }
}
