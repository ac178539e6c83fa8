// src/core/ledger.rs
//! Authoritative positions, one per symbol.
//!
//! [`PositionLedger`] is the only writer and is deliberately not `Clone`; the
//! execution engine owns it. Readers hold a [`LedgerView`], which can only
//! take snapshots. A fill is applied under a single write lock, so readers
//! never see half of one.

use crate::types::{Fill, Position, Side};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

type Positions = Arc<RwLock<BTreeMap<String, Position>>>;

#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: Positions,
}

/// Read-only handle onto a ledger.
#[derive(Debug, Clone)]
pub struct LedgerView {
    positions: Positions,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> LedgerView {
        LedgerView {
            positions: Arc::clone(&self.positions),
        }
    }

    /// Applies one fill. Returns the realized PnL it produced.
    pub fn apply(&mut self, fill: &Fill) -> Decimal {
        let mut positions = self.positions.write();
        let position = positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::flat(&fill.symbol));
        let realized = apply_fill(position, fill);
        debug!(
            symbol = %fill.symbol,
            key = %fill.key,
            qty = %position.quantity,
            avg = %position.avg_entry_price,
            %realized,
            "fill applied"
        );
        realized
    }

    pub fn snapshot(&self, symbol: &str) -> Position {
        self.view().snapshot(symbol)
    }
}

impl LedgerView {
    /// Re-creates the writer after the task owning it died. Fills are applied
    /// under one lock, so the positions behind the view are never torn.
    pub(crate) fn into_writer(self) -> PositionLedger {
        PositionLedger {
            positions: self.positions,
        }
    }

    pub fn snapshot(&self, symbol: &str) -> Position {
        self.positions
            .read()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol))
    }

    /// Every position, with unrealized PnL marked at the given prices.
    /// Symbols without a mark keep the unrealized PnL of zero.
    pub fn snapshot_marked(&self, marks: &HashMap<String, Decimal>) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .map(|p| {
                let mut copy = p.clone();
                if let Some(price) = marks.get(&p.symbol) {
                    copy.unrealized_pnl = p.unrealized_at(*price);
                }
                copy
            })
            .collect()
    }
}

/// Average-cost accounting. Realized PnL only moves when a fill reduces the
/// absolute quantity; a fill through zero realizes the closed part and opens
/// the remainder at the fill price.
fn apply_fill(position: &mut Position, fill: &Fill) -> Decimal {
    if fill.quantity.is_zero() {
        return Decimal::ZERO;
    }

    position.fees_paid += fill.fee;
    position.last_fill_at = Some(fill.timestamp);

    let delta = fill.signed_quantity();
    let old_qty = position.quantity;
    let new_qty = old_qty + delta;
    let mut realized = Decimal::ZERO;

    if old_qty.is_zero() {
        position.avg_entry_price = fill.price;
    } else if old_qty.is_sign_positive() == delta.is_sign_positive() {
        // adding to the position
        let cost = old_qty.abs() * position.avg_entry_price + fill.quantity * fill.price;
        position.avg_entry_price = cost / (old_qty.abs() + fill.quantity);
    } else {
        let closed = fill.quantity.min(old_qty.abs());
        realized = match fill.side {
            Side::Sell => (fill.price - position.avg_entry_price) * closed,
            Side::Buy => (position.avg_entry_price - fill.price) * closed,
        };
        position.realized_pnl += realized;

        if !new_qty.is_zero() && new_qty.is_sign_positive() != old_qty.is_sign_positive() {
            position.avg_entry_price = fill.price;
        }
    }

    position.quantity = new_qty;
    if position.is_flat() {
        position.avg_entry_price = Decimal::ZERO;
    }
    realized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::ts;
    use crate::types::IdempotencyKey;
    use rust_decimal_macros::dec;

    fn fill(side: Side, qty: Decimal, price: Decimal) -> Fill {
        Fill {
            symbol: "BTCUSDT".into(),
            side,
            quantity: qty,
            price,
            fee: Decimal::ZERO,
            timestamp: ts(0),
            key: IdempotencyKey::from("k"),
        }
    }

    #[test]
    fn quantity_is_signed_sum_of_fills() {
        let mut ledger = PositionLedger::new();
        let fills = [
            fill(Side::Buy, dec!(1), dec!(100)),
            fill(Side::Buy, dec!(0.5), dec!(110)),
            fill(Side::Sell, dec!(2), dec!(120)),
            fill(Side::Buy, dec!(0.25), dec!(90)),
        ];
        for f in &fills {
            ledger.apply(f);
        }
        let expected: Decimal = fills.iter().map(|f| f.signed_quantity()).sum();
        assert_eq!(ledger.snapshot("BTCUSDT").quantity, expected);
    }

    #[test]
    fn average_cost_and_realized_pnl() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill(Side::Buy, dec!(1), dec!(100)));
        ledger.apply(&fill(Side::Buy, dec!(1), dec!(110)));
        let pos = ledger.snapshot("BTCUSDT");
        assert_eq!(pos.avg_entry_price, dec!(105));
        assert_eq!(pos.realized_pnl, Decimal::ZERO);

        let realized = ledger.apply(&fill(Side::Sell, dec!(1.5), dec!(115)));
        assert_eq!(realized, dec!(15));
        let pos = ledger.snapshot("BTCUSDT");
        assert_eq!(pos.quantity, dec!(0.5));
        assert_eq!(pos.avg_entry_price, dec!(105));
    }

    #[test]
    fn realized_only_changes_when_reducing() {
        let mut ledger = PositionLedger::new();
        assert_eq!(ledger.apply(&fill(Side::Buy, dec!(1), dec!(100))), Decimal::ZERO);
        assert_eq!(ledger.apply(&fill(Side::Buy, dec!(1), dec!(50))), Decimal::ZERO);
        assert_eq!(ledger.snapshot("BTCUSDT").realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn reversal_opens_remainder_at_fill_price() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill(Side::Buy, dec!(1), dec!(100)));
        let realized = ledger.apply(&fill(Side::Sell, dec!(3), dec!(90)));
        assert_eq!(realized, dec!(-10));

        let pos = ledger.snapshot("BTCUSDT");
        assert_eq!(pos.quantity, dec!(-2));
        assert_eq!(pos.avg_entry_price, dec!(90));
        assert_eq!(pos.unrealized_at(dec!(80)), dec!(20));
    }

    #[test]
    fn flat_position_clears_entry_price() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill(Side::Buy, dec!(2), dec!(100)));
        ledger.apply(&fill(Side::Sell, dec!(2), dec!(100)));
        let pos = ledger.snapshot("BTCUSDT");
        assert!(pos.is_flat());
        assert_eq!(pos.avg_entry_price, Decimal::ZERO);
    }

    #[test]
    fn view_marks_without_mutating() {
        let mut ledger = PositionLedger::new();
        let view = ledger.view();
        ledger.apply(&fill(Side::Buy, dec!(2), dec!(100)));

        let marks = HashMap::from([("BTCUSDT".to_string(), dec!(110))]);
        let marked = view.snapshot_marked(&marks);
        assert_eq!(marked[0].unrealized_pnl, dec!(20));
        assert_eq!(view.snapshot("BTCUSDT").unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn unknown_symbol_is_flat() {
        let ledger = PositionLedger::new();
        assert!(ledger.view().snapshot("ETHUSDT").is_flat());
    }
}
