// src/connectors/traits.rs
use crate::error::ExchangeError;
use crate::types::{Candle, IdempotencyKey, OrderLookup, OrderRequest, OrderResult};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Everything the bot needs from a venue: candles in, orders out.
///
/// Implementations must treat `OrderRequest::key` as the client order id, so a
/// resubmission with the same key can never execute twice.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &str;

    /// Most recent `limit` candles, in whatever order the venue returns them.
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError>;

    async fn query_order_status(
        &self,
        symbol: &str,
        key: &IdempotencyKey,
    ) -> Result<OrderLookup, ExchangeError>;

    /// Free balance of `asset`.
    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;
}
