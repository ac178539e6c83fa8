// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// One OHLCV bar. Never mutated after it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A candle sequence ordered by strictly increasing timestamp.
///
/// The only way to build one is [`CandleSeries::normalize`], so holders of a
/// series never have to re-check ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Sorts by timestamp and drops duplicates. When two candles share a
    /// timestamp the one received last wins, since exchanges revise the bar
    /// that is still forming.
    pub fn normalize(mut candles: Vec<Candle>) -> Self {
        // stable sort keeps arrival order among equal timestamps
        candles.sort_by_key(|c| c.timestamp);
        let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match out.last_mut() {
                Some(last) if last.timestamp == candle.timestamp => *last = candle,
                _ => out.push(candle),
            }
        }
        Self { candles: out }
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Keeps only the `n` most recent candles.
    pub fn tail(mut self, n: usize) -> Self {
        if self.candles.len() > n {
            self.candles.drain(..self.candles.len() - n);
        }
        self
    }
}

impl IntoIterator for CandleSeries {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// Output of one strategy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    /// Timestamp of the candle the signal was computed on.
    pub timestamp: DateTime<Utc>,
    pub action: SignalAction,
    /// Confidence in `0..=1`.
    pub confidence: f64,
    /// Close of the last candle in the window; the price orders are sized against.
    pub reference_price: Decimal,
    /// Quote amount to spend instead of the configured risk fraction.
    pub size_hint: Option<Decimal>,
}

impl Signal {
    pub fn new(last: &Candle, action: SignalAction, confidence: f64) -> Self {
        Self {
            symbol: last.symbol.clone(),
            timestamp: last.timestamp,
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reference_price: last.close,
            size_hint: None,
        }
    }

    pub fn hold(last: &Candle) -> Self {
        Self::new(last, SignalAction::Hold, 0.0)
    }

    pub fn with_size_hint(mut self, quote_amount: Decimal) -> Self {
        self.size_hint = Some(quote_amount);
        self
    }

    pub fn side(&self) -> Option<Side> {
        match self.action {
            SignalAction::Buy => Some(Side::Buy),
            SignalAction::Sell => Some(Side::Sell),
            SignalAction::Hold => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed: positive is long, negative is short.
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub fees_paid: Decimal,
    pub last_fill_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            last_fill_at: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// PnL of the open quantity marked at `price`.
    pub fn unrealized_at(&self, price: Decimal) -> Decimal {
        if self.is_flat() {
            Decimal::ZERO
        } else {
            (price - self.avg_entry_price) * self.quantity
        }
    }
}

/// A confirmed or simulated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
    pub key: IdempotencyKey,
}

impl Fill {
    pub fn signed_quantity(&self) -> Decimal {
        self.side.sign() * self.quantity
    }
}

/// Client-assigned order id. One key is never in flight twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derived from the symbol, the side and the candle the signal was
    /// evaluated on. Every retry of one order intent reuses the same key, while
    /// an exit on the candle that opened the position gets a key of its own.
    pub fn derive(prefix: &str, symbol: &str, side: Side, tick: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}-{}-{}",
            prefix,
            symbol,
            side.as_str(),
            tick.timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    /// Marketable limit price; `None` sends a market order.
    pub limit_price: Option<Decimal>,
    pub key: IdempotencyKey,
    /// Price the order was sized against. Used by simulated venues.
    pub reference_price: Decimal,
    pub tick: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Rejected,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub key: IdempotencyKey,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    /// Average fill price; zero when nothing filled.
    pub fill_price: Decimal,
    pub fee: Decimal,
    pub exchange_order_id: Option<String>,
    pub reason: Option<String>,
}

impl OrderResult {
    pub fn rejected(request: &OrderRequest, reason: impl Into<String>) -> Self {
        Self::empty(request, OrderStatus::Rejected, Some(reason.into()))
    }

    pub fn timed_out(request: &OrderRequest) -> Self {
        Self::empty(request, OrderStatus::TimedOut, None)
    }

    fn empty(request: &OrderRequest, status: OrderStatus, reason: Option<String>) -> Self {
        Self {
            key: request.key.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            status,
            filled_quantity: Decimal::ZERO,
            fill_price: Decimal::ZERO,
            fee: Decimal::ZERO,
            exchange_order_id: None,
            reason,
        }
    }

    pub fn has_fill(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::PartiallyFilled)
            && self.filled_quantity > Decimal::ZERO
    }

    pub fn to_fill(&self, timestamp: DateTime<Utc>) -> Option<Fill> {
        self.has_fill().then(|| Fill {
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.filled_quantity,
            price: self.fill_price,
            fee: self.fee,
            timestamp,
            key: self.key.clone(),
        })
    }
}

/// Answer to a status query for a previously submitted key.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderLookup {
    /// The exchange never saw the key; resubmitting it is safe.
    NotFound,
    /// Accepted but not final yet.
    Pending,
    Final(OrderResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Published by the controller as one unit, so state and details always agree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotStatus {
    pub state: BotState,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_signal: Option<Signal>,
    pub positions: Vec<Position>,
    pub last_error: Option<String>,
    pub ticks: u64,
}

impl BotStatus {
    pub fn idle() -> Self {
        Self {
            state: BotState::Idle,
            last_tick_at: None,
            last_signal: None,
            positions: Vec::new(),
            last_error: None,
            ticks: 0,
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}
