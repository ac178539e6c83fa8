// src/core/fill_model.rs
use crate::types::Side;
use crate::utils::precision::bps_of;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immediate fill at the reference price, shifted against the taker by
/// `slippage_bps`, charged `fee_bps` of notional. Shared by backtests and
/// paper trading so both price fills the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FillModel {
    pub slippage_bps: Decimal,
    pub fee_bps: Decimal,
}

impl FillModel {
    pub fn new(slippage_bps: Decimal, fee_bps: Decimal) -> Self {
        Self {
            slippage_bps,
            fee_bps,
        }
    }

    pub fn fill_price(&self, side: Side, reference_price: Decimal) -> Decimal {
        let slip = bps_of(reference_price, self.slippage_bps);
        match side {
            Side::Buy => reference_price + slip,
            Side::Sell => reference_price - slip,
        }
    }

    pub fn fee(&self, quantity: Decimal, price: Decimal) -> Decimal {
        bps_of(quantity * price, self.fee_bps)
    }
}
