// src/core/sizing.rs
use crate::config::RiskConfig;
use crate::types::{IdempotencyKey, OrderRequest, Position, Side, Signal, SignalAction};
use crate::utils::precision::{normalize_price, normalize_quantity};
use rust_decimal::Decimal;

/// Outcome of turning a signal into an order.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Order(OrderRequest),
    Skip(String),
}

/// Translates signals into sized, keyed orders. Shared by live execution and
/// backtests so both trade exactly the same quantities.
///
/// Spot semantics: a Buy opens a position only when flat, a Sell closes the
/// whole long position.
#[derive(Debug, Clone)]
pub struct OrderPlanner {
    risk: RiskConfig,
    key_prefix: String,
}

impl OrderPlanner {
    pub fn new(risk: RiskConfig, key_prefix: impl Into<String>) -> Self {
        Self {
            risk,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn risk(&self) -> &RiskConfig {
        &self.risk
    }

    pub fn key_for(&self, signal: &Signal, side: Side) -> IdempotencyKey {
        IdempotencyKey::derive(&self.key_prefix, &signal.symbol, side, signal.timestamp)
    }

    pub fn plan(&self, signal: &Signal, position: &Position, available_quote: Decimal) -> Plan {
        let price = signal.reference_price;
        if price <= Decimal::ZERO {
            return Plan::Skip(format!("non-positive reference price {}", price));
        }

        let (side, quantity) = match signal.action {
            SignalAction::Hold => return Plan::Skip("hold".into()),
            SignalAction::Buy if !position.is_flat() => {
                return Plan::Skip("already holding a position".into())
            }
            SignalAction::Sell if !position.is_long() => {
                return Plan::Skip("no long position to close".into())
            }
            SignalAction::Buy => {
                let budget = signal
                    .size_hint
                    .unwrap_or(available_quote * self.risk.capital_fraction)
                    .min(available_quote);
                let raw_qty = (budget / price).min(self.risk.max_position_size);
                (Side::Buy, normalize_quantity(raw_qty, self.risk.step_size))
            }
            SignalAction::Sell => (
                Side::Sell,
                normalize_quantity(position.quantity, self.risk.step_size),
            ),
        };

        if quantity <= Decimal::ZERO {
            return Plan::Skip("quantity is zero after normalization".into());
        }
        let notional = quantity * price;
        if notional < self.risk.min_notional {
            return Plan::Skip(format!(
                "notional {:.2} below minimum {}",
                notional, self.risk.min_notional
            ));
        }

        Plan::Order(OrderRequest {
            symbol: signal.symbol.clone(),
            side,
            quantity,
            limit_price: self.limit_price(side, price),
            key: self.key_for(signal, side),
            reference_price: price,
            tick: signal.timestamp,
        })
    }

    /// Marketable limit: crosses the spread by the guard so it behaves like a
    /// taker order while capping slippage.
    fn limit_price(&self, side: Side, price: Decimal) -> Option<Decimal> {
        let guard = self.risk.slippage_guard_pct;
        if guard.is_zero() {
            return None;
        }
        let raw = match side {
            Side::Buy => price * (Decimal::ONE + guard),
            Side::Sell => price * (Decimal::ONE - guard),
        };
        Some(normalize_price(raw, self.risk.tick_size))
    }
}
