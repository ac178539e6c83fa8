// src/connectors/binance.rs
use crate::config::ExchangeConfig;
use crate::connectors::messages::{BinanceAccount, BinanceApiError, BinanceKline, BinanceOrder};
use crate::connectors::traits::ExchangeClient;
use crate::error::ExchangeError;
use crate::types::{
    Candle, IdempotencyKey, OrderLookup, OrderRequest, OrderResult, OrderStatus, Side,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const CODE_INVALID_SYMBOL: i64 = -1121;
const CODE_NO_SUCH_ORDER: i64 = -2013;
const CODE_BAD_API_KEY: i64 = -2014;
const CODE_REJECTED_MBX_KEY: i64 = -2015;

pub struct BinanceClient {
    api_key: String,
    secret_key: String,
    http_client: Client,
    base_rest_url: String,
    recv_window_ms: u64,
    quote_asset: String,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig, quote_asset: &str) -> Result<Self, ExchangeError> {
        let http_client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            http_client,
            base_rest_url: config.base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
            quote_asset: quote_asset.to_string(),
        })
    }

    fn sign_and_build_query(&self, params: Vec<(&str, String)>) -> Result<String, ExchangeError> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(ExchangeError::Unauthorized("API credentials not configured".into()));
        }
        let mut params = params;
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query_string = serde_urlencoded::to_string(&params)
            .map_err(|e| ExchangeError::Decode(e.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|_| ExchangeError::Unauthorized("invalid secret key length".into()))?;
        mac.update(query_string.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}&signature={}", query_string, signature))
    }

    async fn send_signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let full_query = self.sign_and_build_query(params)?;
        let url = format!("{}{}?{}", self.base_rest_url, endpoint, full_query);

        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        decode(response).await
    }

    fn to_order_result(&self, order: BinanceOrder) -> Result<OrderLookup, ExchangeError> {
        let status = match (order.status.as_str(), order.executed_qty.is_zero()) {
            ("FILLED", _) => OrderStatus::Filled,
            ("NEW" | "PENDING_NEW" | "PARTIALLY_FILLED", _) => return Ok(OrderLookup::Pending),
            // IOC remainders expire after a partial execution
            ("CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH", false) => OrderStatus::PartiallyFilled,
            ("CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" | "REJECTED", true) => {
                OrderStatus::Rejected
            }
            (other, _) => {
                return Err(ExchangeError::Decode(format!("unknown order status {}", other)))
            }
        };
        let side = match order.side.as_str() {
            "SELL" => Side::Sell,
            _ => Side::Buy,
        };

        Ok(OrderLookup::Final(OrderResult {
            key: IdempotencyKey::from(order.client_order_id.as_str()),
            symbol: order.symbol.clone(),
            side,
            status,
            filled_quantity: order.executed_qty,
            fill_price: order.avg_price(),
            fee: order.quote_commission(&self.quote_asset),
            exchange_order_id: Some(order.order_id.to_string()),
            reason: (status == OrderStatus::Rejected).then(|| order.status.clone()),
        }))
    }
}

/// Maps HTTP status and Binance error codes onto the exchange error taxonomy.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(ExchangeError::from);
    }

    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let api_error = serde_json::from_str::<BinanceApiError>(&body).ok();

    Err(match (status, api_error) {
        (StatusCode::TOO_MANY_REQUESTS, _) | (StatusCode::IM_A_TEAPOT, _) => {
            ExchangeError::RateLimited { retry_after }
        }
        (StatusCode::UNAUTHORIZED, _) | (StatusCode::FORBIDDEN, _) => {
            ExchangeError::Unauthorized(body)
        }
        (_, Some(err)) if err.code == CODE_BAD_API_KEY || err.code == CODE_REJECTED_MBX_KEY => {
            ExchangeError::Unauthorized(err.msg)
        }
        (_, Some(err)) if err.code == CODE_INVALID_SYMBOL => ExchangeError::InvalidSymbol(err.msg),
        (s, _) if s.is_server_error() => ExchangeError::Unavailable(format!("{}: {}", s, body)),
        (_, Some(err)) => ExchangeError::Rejected(format!("{} ({})", err.msg, err.code)),
        (s, None) => ExchangeError::Rejected(format!("{}: {}", s, body)),
    })
}

/// Keeps the `limit` most recent klines whose close time has passed, so the
/// live loop sees the same closed bars a backtest replays.
fn closed_candles(
    symbol: &str,
    rows: Vec<BinanceKline>,
    now_ms: i64,
    limit: usize,
) -> Result<Vec<Candle>, ExchangeError> {
    let mut candles = rows
        .into_iter()
        .filter(|k| k.6 < now_ms)
        .map(|k| {
            let timestamp = Utc
                .timestamp_millis_opt(k.0)
                .single()
                .ok_or_else(|| ExchangeError::Decode(format!("bad kline time {}", k.0)))?;
            Ok(Candle {
                symbol: symbol.to_string(),
                timestamp,
                open: k.1,
                high: k.2,
                low: k.3,
                close: k.4,
                volume: k.5,
            })
        })
        .collect::<Result<Vec<_>, ExchangeError>>()?;
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    Ok(candles)
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let url = format!("{}/api/v3/klines", self.base_rest_url);
        let limit = limit.clamp(1, 1000);
        // one extra row: the newest kline is usually still forming
        let request_limit = (limit + 1).min(1000).to_string();
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval),
                ("limit", request_limit.as_str()),
            ])
            .send()
            .await?;

        let rows: Vec<BinanceKline> = decode(response).await?;
        debug!(symbol, rows = rows.len(), "fetched klines");

        closed_candles(symbol, rows, Utc::now().timestamp_millis(), limit)
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.as_str().to_string()),
            ("quantity", request.quantity.to_string()),
            ("newClientOrderId", request.key.to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];

        // LIMIT IOC protects against slippage and never leaves a resting order
        match request.limit_price {
            Some(price) => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "IOC".to_string()));
                params.push(("price", price.to_string()));
            }
            None => {
                warn!(key = %request.key, "sending MARKET order without price protection");
                params.push(("type", "MARKET".to_string()));
            }
        }

        info!(
            key = %request.key,
            "Sending order: {} {} {} @ {:?}",
            request.side.as_str(),
            request.quantity,
            request.symbol,
            request.limit_price
        );

        let order: BinanceOrder = match self
            .send_signed_request(Method::POST, "/api/v3/order", params)
            .await
        {
            Ok(order) => order,
            Err(ExchangeError::Rejected(reason)) => {
                return Ok(OrderResult::rejected(request, reason));
            }
            Err(e) => return Err(e),
        };

        match self.to_order_result(order)? {
            OrderLookup::Final(result) => Ok(result),
            // accepted but still working; the engine resolves it by key
            OrderLookup::Pending | OrderLookup::NotFound => Ok(OrderResult::timed_out(request)),
        }
    }

    async fn query_order_status(
        &self,
        symbol: &str,
        key: &IdempotencyKey,
    ) -> Result<OrderLookup, ExchangeError> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("origClientOrderId", key.to_string()),
        ];
        match self
            .send_signed_request::<BinanceOrder>(Method::GET, "/api/v3/order", params)
            .await
        {
            Ok(order) => self.to_order_result(order),
            Err(ExchangeError::Rejected(msg)) if msg.contains(&CODE_NO_SUCH_ORDER.to_string()) => {
                Ok(OrderLookup::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let account: BinanceAccount = self
            .send_signed_request(Method::GET, "/api/v3/account", vec![])
            .await?;

        Ok(account
            .balances
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINUTE_MS: i64 = 60_000;

    fn kline(open_ms: i64, close: Decimal) -> BinanceKline {
        BinanceKline(
            open_ms,
            close,
            close,
            close,
            close,
            dec!(1),
            open_ms + MINUTE_MS - 1,
            dec!(1),
            1,
            dec!(0),
            dec!(0),
            serde_json::Value::Null,
        )
    }

    #[test]
    fn forming_kline_is_dropped() {
        let rows: Vec<_> = (0..4)
            .map(|i| kline(i * MINUTE_MS, Decimal::from(100 + i)))
            .collect();
        // inside the fourth minute: the last row has not closed yet
        let now = 3 * MINUTE_MS + 10_000;

        let candles = closed_candles("BTCUSDT", rows, now, 3).unwrap();
        let closes: Vec<_> = candles.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![dec!(100), dec!(101), dec!(102)]);
    }

    #[test]
    fn extra_closed_row_is_trimmed_to_limit() {
        let rows: Vec<_> = (0..4)
            .map(|i| kline(i * MINUTE_MS, Decimal::from(100 + i)))
            .collect();
        let now = 10 * MINUTE_MS;

        let candles = closed_candles("BTCUSDT", rows, now, 3).unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].close, dec!(101));
        assert_eq!(candles[2].close, dec!(103));
    }
}
