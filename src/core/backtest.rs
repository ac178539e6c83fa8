// src/core/backtest.rs
//! Offline replay of historical candles through the live strategy contract.
//!
//! A run owns a private ledger and cash balance, reads no clock and performs
//! no I/O. The same inputs always yield the same report, and independent runs
//! can execute in parallel.

use crate::core::fill_model::FillModel;
use crate::core::ledger::PositionLedger;
use crate::core::sizing::{OrderPlanner, Plan};
use crate::error::{BacktestError, StrategyError};
use crate::strategies::traits::Strategy;
use crate::types::{Candle, CandleSeries, Fill, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub strategy: String,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub total_return_pct: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub fees_paid: Decimal,
    pub trade_count: usize,
    /// Fills that reduced an open position.
    pub round_trips: usize,
    pub winning_trips: usize,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: Decimal,
}

/// Result of one replay. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub trades: Vec<Fill>,
    pub equity_curve: Vec<EquityPoint>,
    pub summary: Summary,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Strategy: {}", self.strategy)?;
        writeln!(f, "Initial Capital: {:.2}", self.initial_capital)?;
        writeln!(f, "Final Equity: {:.2}", self.final_equity)?;
        writeln!(f, "Return: {:.2}%", self.total_return_pct)?;
        writeln!(f, "Realized PnL: {:.2}", self.realized_pnl)?;
        writeln!(f, "Unrealized PnL: {:.2}", self.unrealized_pnl)?;
        writeln!(f, "Fees: {:.2}", self.fees_paid)?;
        writeln!(
            f,
            "Trades: {} ({} round trips, {:.1}% won)",
            self.trade_count, self.round_trips, self.win_rate_pct
        )?;
        write!(f, "Max Drawdown: {:.2}%", self.max_drawdown_pct)
    }
}

pub struct BacktestEngine {
    planner: OrderPlanner,
    fill_model: FillModel,
    /// Window handed to the strategy; never smaller than its minimum.
    lookback: Option<usize>,
}

impl BacktestEngine {
    pub fn new(planner: OrderPlanner, fill_model: FillModel, lookback: Option<usize>) -> Self {
        Self {
            planner,
            fill_model,
            lookback,
        }
    }

    pub fn run(
        &self,
        candles: &[Candle],
        strategy: &dyn Strategy,
        initial_capital: Decimal,
    ) -> Result<BacktestReport, BacktestError> {
        if initial_capital <= Decimal::ZERO {
            return Err(BacktestError::NonPositiveCapital(initial_capital));
        }
        let series = CandleSeries::normalize(candles.to_vec());
        let candles = series.as_slice();
        let symbol = match candles.first() {
            Some(first) => first.symbol.clone(),
            None => {
                return Err(StrategyError::InsufficientData {
                    required: strategy.min_window(),
                    got: 0,
                }
                .into())
            }
        };
        if candles.iter().any(|c| c.symbol != symbol) {
            return Err(BacktestError::MixedSymbols);
        }

        let window = self
            .lookback
            .unwrap_or(0)
            .max(strategy.min_window())
            .max(1);
        if candles.len() < window {
            return Err(StrategyError::InsufficientData {
                required: window,
                got: candles.len(),
            }
            .into());
        }

        info!(
            strategy = strategy.name(),
            %symbol,
            candles = candles.len(),
            window,
            "Starting backtest"
        );

        let mut ledger = PositionLedger::new();
        let mut cash = initial_capital;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(candles.len() + 1 - window);
        let mut round_trips = 0;
        let mut winning_trips = 0;

        for end in window..=candles.len() {
            let slice = &candles[end - window..end];
            let candle = &candles[end - 1];
            let position = ledger.snapshot(&symbol);
            let signal = strategy.evaluate(slice, &position)?;

            if let Plan::Order(order) = self.planner.plan(&signal, &position, cash) {
                let price = self.fill_model.fill_price(order.side, candle.close);
                let fee = self.fill_model.fee(order.quantity, price);
                let notional = order.quantity * price;

                let affordable = match order.side {
                    Side::Buy => notional + fee <= cash,
                    Side::Sell => true,
                };
                if affordable {
                    let fill = Fill {
                        symbol: symbol.clone(),
                        side: order.side,
                        quantity: order.quantity,
                        price,
                        fee,
                        timestamp: candle.timestamp,
                        key: order.key,
                    };
                    cash += match fill.side {
                        Side::Buy => -(notional + fee),
                        Side::Sell => notional - fee,
                    };
                    let reduces = position.is_long() && fill.side == Side::Sell;
                    let realized = ledger.apply(&fill);
                    if reduces {
                        round_trips += 1;
                        if realized - fee > Decimal::ZERO {
                            winning_trips += 1;
                        }
                    }
                    debug!(side = ?fill.side, qty = %fill.quantity, %price, %cash, "simulated fill");
                    trades.push(fill);
                } else {
                    debug!(%notional, %cash, "skipping unaffordable order");
                }
            }

            let holding = ledger.snapshot(&symbol).quantity;
            equity_curve.push(EquityPoint {
                timestamp: candle.timestamp,
                equity: cash + holding * candle.close,
            });
        }

        let last_close = candles[candles.len() - 1].close;
        let position = ledger.snapshot(&symbol);
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);

        let summary = Summary {
            strategy: strategy.name().to_string(),
            initial_capital,
            final_equity,
            total_return_pct: ((final_equity - initial_capital) / initial_capital
                * Decimal::ONE_HUNDRED)
                .round_dp(4),
            realized_pnl: position.realized_pnl,
            unrealized_pnl: position.unrealized_at(last_close),
            fees_paid: position.fees_paid,
            trade_count: trades.len(),
            round_trips,
            winning_trips,
            win_rate_pct: if round_trips == 0 {
                0.0
            } else {
                winning_trips as f64 / round_trips as f64 * 100.0
            },
            max_drawdown_pct: max_drawdown_pct(initial_capital, &equity_curve),
        };
        info!(
            final_equity = %summary.final_equity,
            trades = summary.trade_count,
            "Backtest finished"
        );

        Ok(BacktestReport {
            trades,
            equity_curve,
            summary,
        })
    }
}

/// Largest peak-to-trough fall of the curve, in percent of the peak.
fn max_drawdown_pct(initial: Decimal, curve: &[EquityPoint]) -> Decimal {
    let mut peak = initial;
    let mut worst = Decimal::ZERO;
    for point in curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - point.equity) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    (worst * Decimal::ONE_HUNDRED).round_dp(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::strategies::exits::ProtectiveExits;
    use crate::strategies::momentum::Momentum;
    use crate::types::fixtures::{candle, closes, ts};
    use rust_decimal_macros::dec;

    fn planner() -> OrderPlanner {
        OrderPlanner::new(
            RiskConfig {
                capital_fraction: dec!(0.1),
                max_position_size: dec!(1000),
                min_notional: dec!(1),
                step_size: dec!(0.001),
                tick_size: dec!(0.01),
                slippage_guard_pct: Decimal::ZERO,
                stop_loss_pct: None,
                take_profit_pct: None,
                quote_asset: "USDT".into(),
            },
            "bt",
        )
    }

    fn rising(n: usize) -> Vec<Candle> {
        let prices: Vec<Decimal> = (0..n).map(|i| Decimal::from(100 + i)).collect();
        closes("BTCUSDT", &prices)
    }

    fn momentum_with_exits() -> ProtectiveExits {
        ProtectiveExits::new(Box::new(Momentum::new(5, 0.01).unwrap()), None, Some(0.02))
    }

    #[test]
    fn rising_market_realizes_profit() {
        let engine = BacktestEngine::new(planner(), FillModel::default(), None);
        let report = engine
            .run(&rising(100), &momentum_with_exits(), dec!(10000))
            .unwrap();

        assert!(report.summary.realized_pnl > Decimal::ZERO);
        assert_eq!(report.equity_curve.len(), 100 - 5 + 1);
        assert!(report.summary.round_trips > 0);
        assert_eq!(report.summary.win_rate_pct, 100.0);
        assert!(report
            .trades
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn identical_inputs_give_identical_reports() {
        let engine = BacktestEngine::new(
            planner(),
            FillModel::new(dec!(5), dec!(10)),
            Some(20),
        );
        let candles = rising(200);
        let strategy = momentum_with_exits();

        let a = engine.run(&candles, &strategy, dec!(5000)).unwrap();
        let b = engine.run(&candles, &strategy, dec!(5000)).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn parallel_runs_do_not_interfere() {
        let candles = rising(150);
        let reference = BacktestEngine::new(planner(), FillModel::default(), None)
            .run(&candles, &momentum_with_exits(), dec!(10000))
            .unwrap();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        BacktestEngine::new(planner(), FillModel::default(), None)
                            .run(&candles, &momentum_with_exits(), dec!(10000))
                            .unwrap()
                    })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), reference);
            }
        });
    }

    #[test]
    fn fees_reduce_equity() {
        let candles = rising(100);
        let free = BacktestEngine::new(planner(), FillModel::default(), None)
            .run(&candles, &momentum_with_exits(), dec!(10000))
            .unwrap();
        let costly = BacktestEngine::new(planner(), FillModel::new(Decimal::ZERO, dec!(10)), None)
            .run(&candles, &momentum_with_exits(), dec!(10000))
            .unwrap();

        assert!(costly.summary.fees_paid > Decimal::ZERO);
        assert!(costly.summary.final_equity < free.summary.final_equity);
    }

    #[test]
    fn too_few_candles_is_insufficient_data() {
        let engine = BacktestEngine::new(planner(), FillModel::default(), None);
        let err = engine
            .run(&rising(4), &momentum_with_exits(), dec!(10000))
            .unwrap_err();
        assert!(matches!(
            err,
            BacktestError::Strategy(StrategyError::InsufficientData { required: 5, got: 4 })
        ));

        let err = engine.run(&[], &momentum_with_exits(), dec!(10000)).unwrap_err();
        assert!(matches!(err, BacktestError::Strategy(_)));
    }

    #[test]
    fn rejects_mixed_symbols_and_bad_capital() {
        let engine = BacktestEngine::new(planner(), FillModel::default(), None);
        let mut candles = rising(10);
        candles.push(candle("ETHUSDT", 50, dec!(10)));
        assert!(matches!(
            engine.run(&candles, &momentum_with_exits(), dec!(10000)),
            Err(BacktestError::MixedSymbols)
        ));
        assert!(matches!(
            engine.run(&rising(10), &momentum_with_exits(), Decimal::ZERO),
            Err(BacktestError::NonPositiveCapital(_))
        ));
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let curve: Vec<EquityPoint> = [dec!(12000), dec!(9000), dec!(11000)]
            .into_iter()
            .enumerate()
            .map(|(i, equity)| EquityPoint {
                timestamp: ts(i as i64),
                equity,
            })
            .collect();
        assert_eq!(max_drawdown_pct(dec!(10000), &curve), dec!(25));
        assert_eq!(max_drawdown_pct(dec!(10000), &[]), Decimal::ZERO);
    }
}
