// src/connectors/mock.rs
//! Scripted in-memory exchange for tests.

use crate::connectors::traits::ExchangeClient;
use crate::error::ExchangeError;
use crate::types::{Candle, IdempotencyKey, OrderLookup, OrderRequest, OrderResult, OrderStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// What the next `submit_order` call does.
#[derive(Debug)]
pub enum SubmitBehavior {
    Fill,
    /// Fill only part of the requested quantity.
    PartialFill(Decimal),
    Reject(String),
    /// Never reaches the venue; the call fails with a timeout.
    LostInTransit,
    /// The venue executes the order but the response is lost.
    FillThenTimeout,
    /// Accepted, left pending for the given number of status queries.
    PendingFor(usize),
    Fail(ExchangeError),
}

#[derive(Default)]
pub struct MockExchange {
    candles: Mutex<HashMap<String, Vec<Candle>>>,
    fetch_script: Mutex<VecDeque<ExchangeError>>,
    submit_script: Mutex<VecDeque<SubmitBehavior>>,
    executed: Mutex<HashMap<IdempotencyKey, OrderResult>>,
    pending: Mutex<HashMap<IdempotencyKey, (usize, OrderRequest)>>,
    submissions: Mutex<Vec<OrderRequest>>,
    executions: Mutex<Vec<IdempotencyKey>>,
    invalid_symbols: Mutex<HashSet<String>>,
    balance: Mutex<Decimal>,
    balance_error: Mutex<Option<ExchangeError>>,
    submit_delay: Mutex<Duration>,
    fetch_delay: Mutex<Duration>,
    fetch_calls: AtomicUsize,
    fetch_in_flight: AtomicUsize,
    max_fetch_in_flight: AtomicUsize,
    pub submit_started: Notify,
}

impl MockExchange {
    pub fn new(balance: Decimal) -> Self {
        let mock = Self::default();
        *mock.balance.lock() = balance;
        mock
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles.lock().insert(symbol.to_string(), candles);
    }

    pub fn push_candle(&self, candle: Candle) {
        self.candles
            .lock()
            .entry(candle.symbol.clone())
            .or_default()
            .push(candle);
    }

    pub fn mark_invalid(&self, symbol: &str) {
        self.invalid_symbols.lock().insert(symbol.to_string());
    }

    pub fn fail_next_fetch(&self, error: ExchangeError) {
        self.fetch_script.lock().push_back(error);
    }

    /// Every later balance query fails with a copy of `error`.
    pub fn fail_balance(&self, error: ExchangeError) {
        *self.balance_error.lock() = Some(error);
    }

    pub fn script_submit(&self, behavior: SubmitBehavior) {
        self.submit_script.lock().push_back(behavior);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock() = delay;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }

    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.submissions.lock().clone()
    }

    /// Keys the venue actually executed, once per execution.
    pub fn executions(&self) -> Vec<IdempotencyKey> {
        self.executions.lock().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_fetch_in_flight.load(Ordering::SeqCst)
    }

    fn execute(&self, request: &OrderRequest, quantity: Decimal) -> OrderResult {
        let status = if quantity < request.quantity {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        };
        let result = OrderResult {
            key: request.key.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            status,
            filled_quantity: quantity,
            fill_price: request.reference_price,
            fee: Decimal::ZERO,
            exchange_order_id: Some(format!("mock-{}", self.executions.lock().len())),
            reason: None,
        };
        self.executions.lock().push(request.key.clone());
        self.executed.lock().insert(request.key.clone(), result.clone());
        result
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.fetch_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_fetch_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.fetch_in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.fetch_script.lock().pop_front() {
            return Err(err);
        }
        if self.invalid_symbols.lock().contains(symbol) {
            return Err(ExchangeError::InvalidSymbol(symbol.to_string()));
        }
        let candles = self.candles.lock().get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        self.submissions.lock().push(request.clone());
        self.submit_started.notify_waiters();

        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // a real venue refuses a client id it has already seen
        if let Some(done) = self.executed.lock().get(&request.key) {
            return Ok(done.clone());
        }

        let behavior = self
            .submit_script
            .lock()
            .pop_front()
            .unwrap_or(SubmitBehavior::Fill);
        match behavior {
            SubmitBehavior::Fill => Ok(self.execute(request, request.quantity)),
            SubmitBehavior::PartialFill(qty) => Ok(self.execute(request, qty)),
            SubmitBehavior::Reject(reason) => Ok(OrderResult::rejected(request, reason)),
            SubmitBehavior::LostInTransit => Err(ExchangeError::Timeout),
            SubmitBehavior::FillThenTimeout => {
                self.execute(request, request.quantity);
                Err(ExchangeError::Timeout)
            }
            SubmitBehavior::PendingFor(queries) => {
                self.pending
                    .lock()
                    .insert(request.key.clone(), (queries, request.clone()));
                Ok(OrderResult::timed_out(request))
            }
            SubmitBehavior::Fail(err) => Err(err),
        }
    }

    async fn query_order_status(
        &self,
        _symbol: &str,
        key: &IdempotencyKey,
    ) -> Result<OrderLookup, ExchangeError> {
        if let Some(done) = self.executed.lock().get(key) {
            return Ok(OrderLookup::Final(done.clone()));
        }
        let mut pending = self.pending.lock();
        match pending.get(key).map(|(remaining, _)| *remaining) {
            Some(remaining) if remaining > 0 => {
                let request = pending[key].1.clone();
                pending.insert(key.clone(), (remaining - 1, request));
                Ok(OrderLookup::Pending)
            }
            Some(_) => {
                let (_, request) = pending.remove(key).expect("entry checked above");
                drop(pending);
                Ok(OrderLookup::Final(self.execute(&request, request.quantity)))
            }
            None => Ok(OrderLookup::NotFound),
        }
    }

    async fn available_balance(&self, _asset: &str) -> Result<Decimal, ExchangeError> {
        if let Some(error) = self.balance_error.lock().as_ref() {
            return Err(error.clone());
        }
        Ok(*self.balance.lock())
    }
}
