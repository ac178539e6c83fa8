// src/connectors/messages.rs
use rust_decimal::Decimal;
use serde::Deserialize;

/// One row of `GET /api/v3/klines`. Binance sends klines as positional arrays:
/// open time, OHLCV, close time, quote volume, trade count, taker volumes, unused.
#[derive(Debug, Deserialize)]
pub struct BinanceKline(
    pub i64,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub i64,
    pub Decimal,
    pub u64,
    pub Decimal,
    pub Decimal,
    pub serde_json::Value,
);

/// Order payload returned by both `POST` and `GET /api/v3/order`.
#[derive(Debug, Deserialize)]
pub struct BinanceOrder {
    #[serde(rename = "orderId")]
    pub order_id: u64,

    pub symbol: String,

    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,

    /// BUY or SELL.
    pub side: String,

    /// NEW, PARTIALLY_FILLED, FILLED, CANCELED, REJECTED, EXPIRED, ...
    pub status: String,

    #[serde(rename = "executedQty")]
    pub executed_qty: Decimal,

    #[serde(rename = "cummulativeQuoteQty")]
    pub cumulative_quote_qty: Decimal,

    #[serde(default)]
    pub fills: Vec<BinanceFill>,
}

impl BinanceOrder {
    /// Volume weighted average price, zero when nothing executed.
    pub fn avg_price(&self) -> Decimal {
        if self.executed_qty.is_zero() {
            Decimal::ZERO
        } else {
            self.cumulative_quote_qty / self.executed_qty
        }
    }

    /// Commission paid in the quote asset. Commissions charged in other
    /// assets (e.g. BNB) are not converted.
    pub fn quote_commission(&self, quote_asset: &str) -> Decimal {
        self.fills
            .iter()
            .filter(|f| f.commission_asset == quote_asset)
            .map(|f| f.commission)
            .sum()
    }
}

#[derive(Debug, Deserialize)]
pub struct BinanceFill {
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    #[serde(rename = "commissionAsset")]
    pub commission_asset: String,
}

/// Error body: `{"code": -1121, "msg": "Invalid symbol."}`.
#[derive(Debug, Deserialize)]
pub struct BinanceApiError {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct BinanceBalance {
    pub asset: String,
    pub free: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct BinanceAccount {
    pub balances: Vec<BinanceBalance>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_kline_row() {
        let raw = r#"[[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"]]"#;
        let rows: Vec<BinanceKline> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 1499040000000);
        assert_eq!(rows[0].4, dec!(0.01577100));
    }

    #[test]
    fn order_average_price() {
        let raw = r#"{"symbol":"BTCUSDT","orderId":28,"clientOrderId":"cb-BTCUSDT-1","side":"BUY","status":"FILLED",
            "executedQty":"2.0","cummulativeQuoteQty":"200.0",
            "fills":[{"price":"100","qty":"2.0","commission":"0.2","commissionAsset":"USDT"}]}"#;
        let order: BinanceOrder = serde_json::from_str(raw).unwrap();
        assert_eq!(order.avg_price(), dec!(100));
        assert_eq!(order.quote_commission("USDT"), dec!(0.2));
    }
}
