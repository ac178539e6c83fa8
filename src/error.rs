// src/error.rs
use crate::types::{IdempotencyKey, OrderStatus};
use std::time::Duration;
use thiserror::Error;

/// How a failure should be handled by whoever observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried on the next scheduled tick, never inline.
    Transient,
    /// Surfaced on the call that failed; bot state is unchanged.
    Permanent,
    /// Halts the loop until an explicit reset.
    Unrecoverable,
    /// Outcome unknown; must be reconciled before anything is retried.
    Ambiguous,
}

/// Failures reported by an exchange client.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by exchange")]
    RateLimited { retry_after: Option<Duration> },

    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ExchangeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ExchangeError::Timeout
            | ExchangeError::Network(_)
            | ExchangeError::RateLimited { .. }
            | ExchangeError::Unavailable(_)
            | ExchangeError::Decode(_) => ErrorClass::Transient,
            ExchangeError::InvalidSymbol(_) | ExchangeError::Rejected(_) => ErrorClass::Permanent,
            ExchangeError::Unauthorized(_) => ErrorClass::Unrecoverable,
        }
    }

    /// Whether an order submission failing this way may still have reached
    /// the matching engine.
    pub fn is_ambiguous_for_submit(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout
                | ExchangeError::Network(_)
                | ExchangeError::Unavailable(_)
                | ExchangeError::Decode(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExchangeError::Timeout
        } else if e.is_decode() {
            ExchangeError::Decode(e.to_string())
        } else {
            ExchangeError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("rate limited; next request allowed in {backoff:?}")]
    RateLimited { backoff: Duration },

    #[error("exchange refused credentials: {0}")]
    Unauthorized(String),
}

impl DataError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DataError::DataUnavailable { .. } | DataError::RateLimited { .. } => {
                ErrorClass::Transient
            }
            DataError::InvalidSymbol(_) => ErrorClass::Permanent,
            DataError::Unauthorized(_) => ErrorClass::Unrecoverable,
        }
    }
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("insufficient data: need {required} candles, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("invalid strategy parameters: {0}")]
    InvalidParameters(String),
}

impl StrategyError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Permanent
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order {key} rejected: {reason}")]
    Rejected { key: IdempotencyKey, reason: String },

    #[error("order {key} outcome unknown after reconciliation")]
    Unresolved { key: IdempotencyKey },

    #[error("order {key} returned unexpected status {status:?}")]
    UnexpectedStatus {
        key: IdempotencyKey,
        status: OrderStatus,
    },

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

impl ExecutionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ExecutionError::Rejected { .. } => ErrorClass::Permanent,
            ExecutionError::Unresolved { .. } | ExecutionError::UnexpectedStatus { .. } => {
                ErrorClass::Ambiguous
            }
            ExecutionError::Exchange(e) => e.class(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("initial capital must be positive (got {0})")]
    NonPositiveCapital(rust_decimal::Decimal),

    #[error("history contains more than one symbol")]
    MixedSymbols,

    #[error("failed to load history: {0}")]
    History(#[from] DataError),
}

/// Failure of one tick or one control operation.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background task panicked: {0}")]
    TaskPanicked(String),
}

impl BotError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BotError::Data(e) => e.class(),
            BotError::Strategy(e) => e.class(),
            BotError::Execution(e) => e.class(),
            BotError::Backtest(_) => ErrorClass::Permanent,
            BotError::Config(_) | BotError::TaskPanicked(_) => ErrorClass::Unrecoverable,
        }
    }
}
