// src/core/engine.rs
use crate::config::BotConfig;
use crate::connectors::traits::ExchangeClient;
use crate::core::ledger::{LedgerView, PositionLedger};
use crate::core::sizing::{OrderPlanner, Plan};
use crate::error::{ErrorClass, ExchangeError, ExecutionError};
use crate::types::{
    IdempotencyKey, OrderLookup, OrderRequest, OrderResult, OrderStatus, Position, Side, Signal,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const SETTLED_KEYS_CAPACITY: usize = 4096;

/// Timeouts and reconciliation limits for order submission.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub order_timeout: Duration,
    pub reconcile_attempts: u32,
    pub reconcile_delay: Duration,
}

impl From<&BotConfig> for ExecutionPolicy {
    fn from(config: &BotConfig) -> Self {
        Self {
            order_timeout: config.order_timeout(),
            reconcile_attempts: config.reconcile_attempts,
            reconcile_delay: config.reconcile_delay(),
        }
    }
}

/// Keys whose outcome is known, oldest evicted first.
#[derive(Debug, Default)]
struct SettledKeys {
    set: HashSet<IdempotencyKey>,
    order: VecDeque<IdempotencyKey>,
}

impl SettledKeys {
    fn contains(&self, key: &IdempotencyKey) -> bool {
        self.set.contains(key)
    }

    fn insert(&mut self, key: IdempotencyKey) {
        if self.set.insert(key.clone()) {
            self.order.push_back(key);
            if self.order.len() > SETTLED_KEYS_CAPACITY {
                if let Some(old) = self.order.pop_front() {
                    self.set.remove(&old);
                }
            }
        }
    }
}

/// Turns signals into orders and confirmed fills into ledger updates.
///
/// The engine is the only writer of its [`PositionLedger`]. Every method that
/// talks to the exchange takes `&mut self`, so one engine never has two
/// submissions in flight; together with the settled-key set this means a key
/// is never submitted twice concurrently and never re-traded once settled.
///
/// Submission outcomes:
/// - `Rejected` is final, logged, and leaves the ledger alone.
/// - `TimedOut` (or a transport failure after sending) is ambiguous. The
///   engine queries the order by key and only resubmits the same key when the
///   exchange reports it has never seen it. If the outcome is still unknown
///   after the configured attempts the order is parked; the symbol trades
///   nothing else until a later call resolves it.
/// - `Filled` / `PartiallyFilled` apply the confirmed quantity and price.
pub struct ExecutionEngine {
    exchange: Arc<dyn ExchangeClient>,
    planner: OrderPlanner,
    policy: ExecutionPolicy,
    ledger: PositionLedger,
    settled: SettledKeys,
    parked: HashMap<String, OrderRequest>,
}

impl ExecutionEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        planner: OrderPlanner,
        policy: ExecutionPolicy,
        ledger: PositionLedger,
    ) -> Self {
        Self {
            exchange,
            planner,
            policy,
            ledger,
            settled: SettledKeys::default(),
            parked: HashMap::new(),
        }
    }

    /// Applies a new configuration; positions and order bookkeeping survive.
    pub fn reconfigure(&mut self, planner: OrderPlanner, policy: ExecutionPolicy) {
        self.planner = planner;
        self.policy = policy;
    }

    pub fn ledger_view(&self) -> LedgerView {
        self.ledger.view()
    }

    pub fn position(&self, symbol: &str) -> Position {
        self.ledger.snapshot(symbol)
    }

    pub fn has_parked_order(&self, symbol: &str) -> bool {
        self.parked.contains_key(symbol)
    }

    /// Executes one signal against the exchange. `Ok(None)` means no order was
    /// needed (hold, spot no-op, already settled).
    pub async fn execute(
        &mut self,
        signal: &Signal,
        position: &Position,
    ) -> Result<Option<OrderResult>, ExecutionError> {
        if let Some(parked) = self.parked.get(&signal.symbol).cloned() {
            if let Some(result) = self.resolve_parked(&parked).await? {
                // position moved under the signal; act on the next tick
                return Ok(Some(result));
            }
        }

        let Some(side) = signal.side() else {
            return Ok(None);
        };

        let key = self.planner.key_for(signal, side);
        if self.settled.contains(&key) {
            debug!(%key, "signal already executed for this candle");
            return Ok(None);
        }

        // the balance only matters for a Buy that can actually open a position
        let available = match side {
            Side::Buy if position.is_flat() => self.available_quote().await?,
            _ => Decimal::ZERO,
        };

        match self.planner.plan(signal, position, available) {
            Plan::Skip(reason) => {
                debug!(symbol = %signal.symbol, action = ?signal.action, %reason, "no order");
                Ok(None)
            }
            Plan::Order(request) => {
                info!(
                    key = %request.key,
                    "Signal {:?} {} -> {:?} {} @ {} (confidence {:.2})",
                    signal.action,
                    request.symbol,
                    request.side,
                    request.quantity,
                    request.reference_price,
                    signal.confidence
                );
                let result = self.submit(&request).await?;
                self.settle(&request, result).map(Some)
            }
        }
    }

    async fn available_quote(&self) -> Result<Decimal, ExecutionError> {
        let asset = self.planner.risk().quote_asset.clone();
        timeout(
            self.policy.order_timeout,
            self.exchange.available_balance(&asset),
        )
        .await
        .unwrap_or(Err(ExchangeError::Timeout))
        .map_err(ExecutionError::from)
    }

    async fn submit(&mut self, request: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        match self.submit_bounded(request).await {
            Ok(result) if result.status != OrderStatus::TimedOut => Ok(result),
            Ok(_) => {
                warn!(key = %request.key, "order submission timed out, reconciling");
                self.reconcile(request).await
            }
            Err(e) if e.is_ambiguous_for_submit() => {
                warn!(key = %request.key, error = %e, "order outcome unknown, reconciling");
                self.reconcile(request).await
            }
            Err(ExchangeError::Rejected(reason)) => Ok(OrderResult::rejected(request, reason)),
            Err(e) => Err(e.into()),
        }
    }

    async fn submit_bounded(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        match timeout(self.policy.order_timeout, self.exchange.submit_order(request)).await {
            Ok(result) => result,
            Err(_) => Ok(OrderResult::timed_out(request)),
        }
    }

    async fn query_bounded(&self, request: &OrderRequest) -> Result<OrderLookup, ExchangeError> {
        timeout(
            self.policy.order_timeout,
            self.exchange
                .query_order_status(&request.symbol, &request.key),
        )
        .await
        .unwrap_or(Err(ExchangeError::Timeout))
    }

    /// Queries by key until the outcome is known. Resubmits the same key only
    /// when the exchange has no record of it.
    async fn reconcile(&mut self, request: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        for attempt in 1..=self.policy.reconcile_attempts {
            tokio::time::sleep(self.policy.reconcile_delay).await;

            match self.query_bounded(request).await {
                Ok(OrderLookup::Final(result)) => {
                    info!(key = %request.key, attempt, status = ?result.status, "order reconciled");
                    return Ok(result);
                }
                Ok(OrderLookup::Pending) => {
                    debug!(key = %request.key, attempt, "order still pending");
                }
                Ok(OrderLookup::NotFound) => {
                    info!(key = %request.key, attempt, "exchange has no record, resubmitting same key");
                    match self.submit_bounded(request).await {
                        Ok(result) if result.status != OrderStatus::TimedOut => return Ok(result),
                        Ok(_) => {}
                        Err(e) if e.is_ambiguous_for_submit() => {}
                        Err(ExchangeError::Rejected(reason)) => {
                            return Ok(OrderResult::rejected(request, reason))
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) if e.class() == ErrorClass::Unrecoverable => return Err(e.into()),
                Err(e) => {
                    warn!(key = %request.key, attempt, error = %e, "status query failed");
                }
            }
        }

        error!(key = %request.key, "order outcome unresolved, parking until next tick");
        self.parked
            .insert(request.symbol.clone(), request.clone());
        Err(ExecutionError::Unresolved {
            key: request.key.clone(),
        })
    }

    /// One status query for a parked order. `Ok(None)` means the exchange
    /// never saw it and the symbol is free to trade again.
    async fn resolve_parked(
        &mut self,
        request: &OrderRequest,
    ) -> Result<Option<OrderResult>, ExecutionError> {
        match self.query_bounded(request).await {
            Ok(OrderLookup::Final(result)) => {
                self.parked.remove(&request.symbol);
                info!(key = %request.key, status = ?result.status, "parked order resolved");
                self.settle(request, result).map(Some)
            }
            Ok(OrderLookup::NotFound) => {
                self.parked.remove(&request.symbol);
                self.settled.insert(request.key.clone());
                info!(key = %request.key, "parked order never reached the exchange, dropping it");
                Ok(None)
            }
            Ok(OrderLookup::Pending) => Err(ExecutionError::Unresolved {
                key: request.key.clone(),
            }),
            Err(e) if e.class() == ErrorClass::Unrecoverable => Err(e.into()),
            Err(e) => {
                warn!(key = %request.key, error = %e, "parked order still unknown");
                Err(ExecutionError::Unresolved {
                    key: request.key.clone(),
                })
            }
        }
    }

    fn settle(
        &mut self,
        request: &OrderRequest,
        result: OrderResult,
    ) -> Result<OrderResult, ExecutionError> {
        self.settled.insert(request.key.clone());

        match result.status {
            OrderStatus::Rejected => {
                let reason = result.reason.clone().unwrap_or_else(|| "unspecified".into());
                warn!(key = %request.key, %reason, "order rejected");
                Err(ExecutionError::Rejected {
                    key: request.key.clone(),
                    reason,
                })
            }
            OrderStatus::TimedOut => Err(ExecutionError::UnexpectedStatus {
                key: request.key.clone(),
                status: result.status,
            }),
            OrderStatus::Filled | OrderStatus::PartiallyFilled => {
                if let Some(fill) = result.to_fill(Utc::now()) {
                    let realized = self.ledger.apply(&fill);
                    info!(
                        key = %fill.key,
                        status = ?result.status,
                        "Filled {:?} {} {} @ {} (realized {})",
                        fill.side,
                        fill.quantity,
                        fill.symbol,
                        fill.price,
                        realized
                    );
                }
                Ok(result)
            }
        }
    }
}
