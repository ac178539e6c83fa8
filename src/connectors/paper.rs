// src/connectors/paper.rs
use crate::connectors::traits::ExchangeClient;
use crate::core::fill_model::FillModel;
use crate::error::ExchangeError;
use crate::types::{
    Candle, IdempotencyKey, OrderLookup, OrderRequest, OrderResult, OrderStatus, Side,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
struct PaperBook {
    /// Free balance per asset.
    balances: HashMap<String, Decimal>,
    last_close: HashMap<String, Decimal>,
    orders: HashMap<IdempotencyKey, OrderResult>,
}

/// Simulated venue on top of real market data.
///
/// Candles come from the wrapped client; orders fill immediately through the
/// same [`FillModel`] backtests use, against the latest close seen for the
/// symbol. Balances are tracked per asset so spot limits (no selling what you
/// do not hold) apply. A client order id is executed at most once.
pub struct PaperExchange {
    market: Arc<dyn ExchangeClient>,
    fill_model: FillModel,
    quote_asset: String,
    book: Mutex<PaperBook>,
}

impl PaperExchange {
    pub fn new(
        market: Arc<dyn ExchangeClient>,
        fill_model: FillModel,
        quote_asset: &str,
        starting_quote: Decimal,
    ) -> Self {
        let mut book = PaperBook::default();
        book.balances.insert(quote_asset.to_string(), starting_quote);
        Self {
            market,
            fill_model,
            quote_asset: quote_asset.to_string(),
            book: Mutex::new(book),
        }
    }

    fn base_asset<'a>(&self, symbol: &'a str) -> &'a str {
        symbol.strip_suffix(self.quote_asset.as_str()).unwrap_or(symbol)
    }

    fn fill(&self, book: &mut PaperBook, request: &OrderRequest) -> OrderResult {
        let reference = book
            .last_close
            .get(&request.symbol)
            .copied()
            .unwrap_or(request.reference_price);
        let price = self.fill_model.fill_price(request.side, reference);

        if let Some(limit) = request.limit_price {
            let crosses = match request.side {
                Side::Buy => price <= limit,
                Side::Sell => price >= limit,
            };
            if !crosses {
                return OrderResult::rejected(
                    request,
                    format!("limit {} not marketable at {}", limit, price),
                );
            }
        }

        let fee = self.fill_model.fee(request.quantity, price);
        let notional = request.quantity * price;
        let base = self.base_asset(&request.symbol).to_string();
        let quote_free = book.balances.get(&self.quote_asset).copied().unwrap_or_default();
        let base_free = book.balances.get(&base).copied().unwrap_or_default();

        match request.side {
            Side::Buy if notional + fee > quote_free => {
                return OrderResult::rejected(request, "insufficient balance")
            }
            Side::Sell if request.quantity > base_free => {
                return OrderResult::rejected(request, "insufficient balance")
            }
            Side::Buy => {
                book.balances
                    .insert(self.quote_asset.clone(), quote_free - notional - fee);
                book.balances.insert(base, base_free + request.quantity);
            }
            Side::Sell => {
                book.balances
                    .insert(self.quote_asset.clone(), quote_free + notional - fee);
                book.balances.insert(base, base_free - request.quantity);
            }
        }

        info!(
            key = %request.key,
            "Paper {:?}: {} {} at {} (Notional: {:.2}, Fee: {})",
            request.side,
            request.quantity,
            request.symbol,
            price,
            notional,
            fee
        );

        OrderResult {
            key: request.key.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            fill_price: price,
            fee,
            exchange_order_id: Some(Uuid::new_v4().to_string()),
            reason: None,
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let candles = self.market.fetch_candles(symbol, interval, limit).await?;
        if let Some(latest) = candles.iter().max_by_key(|c| c.timestamp) {
            self.book
                .lock()
                .last_close
                .insert(symbol.to_string(), latest.close);
        }
        Ok(candles)
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        let mut book = self.book.lock();
        if let Some(existing) = book.orders.get(&request.key) {
            return Ok(existing.clone());
        }
        let result = self.fill(&mut book, request);
        book.orders.insert(request.key.clone(), result.clone());
        Ok(result)
    }

    async fn query_order_status(
        &self,
        _symbol: &str,
        key: &IdempotencyKey,
    ) -> Result<OrderLookup, ExchangeError> {
        Ok(match self.book.lock().orders.get(key) {
            Some(result) => OrderLookup::Final(result.clone()),
            None => OrderLookup::NotFound,
        })
    }

    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        Ok(self
            .book
            .lock()
            .balances
            .get(asset)
            .copied()
            .unwrap_or_default())
    }
}
