// src/utils/precision.rs
use rust_decimal::Decimal;

/// Rounds a quantity DOWN to a multiple of `step_size`.
/// Example: amount=10.999, step=1.0 -> 10.0
pub fn normalize_quantity(amount: Decimal, step_size: Decimal) -> Decimal {
    if step_size.is_zero() {
        return amount;
    }
    ((amount / step_size).floor() * step_size).normalize()
}

/// Rounds a price to the NEAREST multiple of `tick_size`.
/// Example: price=100.16, tick=0.1 -> 100.2
pub fn normalize_price(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    ((price / tick_size).round() * tick_size).normalize()
}

/// `value * bps / 10_000`.
pub fn bps_of(value: Decimal, bps: Decimal) -> Decimal {
    value * bps / Decimal::from(10_000)
}
