// src/core/market_data.rs
use crate::config::MarketDataConfig;
use crate::connectors::traits::ExchangeClient;
use crate::error::{DataError, ExchangeError};
use crate::types::CandleSeries;
use crate::utils::backoff::ExponentialBackoff;
use crate::utils::rate_limit::RequestSpacer;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CachedWindow {
    fetched_at: Instant,
    series: CandleSeries,
}

struct Throttle {
    backoff: ExponentialBackoff,
    blocked_until: Option<Instant>,
}

/// Fetches recent candles for the live loop and for backtest history.
///
/// Every call returns a fresh, deduplicated, timestamp-ordered series. A
/// window fetched less than `cache_ttl` ago is served from memory; with the
/// default ttl far below any tick interval this only absorbs bursts.
///
/// Outbound requests are spaced by [`RequestSpacer`]. When the exchange
/// rate-limits us, further requests fail fast with
/// [`DataError::RateLimited`] until an exponential backoff has elapsed.
pub struct MarketDataSource {
    exchange: Arc<dyn ExchangeClient>,
    spacer: RequestSpacer,
    cache: Mutex<HashMap<(String, String), CachedWindow>>,
    throttle: Mutex<Throttle>,
    cache_ttl: Duration,
    request_timeout: Duration,
}

impl MarketDataSource {
    pub fn new(exchange: Arc<dyn ExchangeClient>, config: &MarketDataConfig) -> Self {
        Self {
            exchange,
            spacer: RequestSpacer::new(Duration::from_millis(config.min_request_spacing_ms)),
            cache: Mutex::new(HashMap::new()),
            throttle: Mutex::new(Throttle {
                backoff: ExponentialBackoff::new(
                    Duration::from_millis(config.backoff_base_ms),
                    Duration::from_millis(config.backoff_max_ms),
                    0.1,
                ),
                blocked_until: None,
            }),
            cache_ttl: Duration::from_millis(config.cache_ttl_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// The `window` most recent candles of `symbol` at `interval`.
    pub async fn fetch_recent(
        &self,
        symbol: &str,
        interval: &str,
        window: usize,
    ) -> Result<CandleSeries, DataError> {
        let cache_key = (symbol.to_string(), interval.to_string());
        if let Some(series) = self.cached(&cache_key, window) {
            debug!(symbol, window, "serving candles from cache");
            return Ok(series);
        }

        if let Some(remaining) = self.blocked_for() {
            return Err(DataError::RateLimited { backoff: remaining });
        }

        self.spacer.acquire().await;
        let fetched = tokio::time::timeout(
            self.request_timeout,
            self.exchange.fetch_candles(symbol, interval, window),
        )
        .await
        .unwrap_or(Err(ExchangeError::Timeout));

        let candles = match fetched {
            Ok(candles) => {
                self.throttle.lock().backoff.reset();
                candles
            }
            Err(e) => return Err(self.classify(symbol, e)),
        };

        let series = CandleSeries::normalize(candles);
        if series.is_empty() {
            return Err(DataError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "exchange returned no candles".into(),
            });
        }

        self.cache.lock().insert(
            cache_key,
            CachedWindow {
                fetched_at: Instant::now(),
                series: series.clone(),
            },
        );
        Ok(series.tail(window))
    }

    fn cached(&self, key: &(String, String), window: usize) -> Option<CandleSeries> {
        let cache = self.cache.lock();
        let hit = cache.get(key)?;
        (hit.fetched_at.elapsed() < self.cache_ttl && hit.series.len() >= window)
            .then(|| hit.series.clone().tail(window))
    }

    fn blocked_for(&self) -> Option<Duration> {
        let throttle = self.throttle.lock();
        let until = throttle.blocked_until?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    fn classify(&self, symbol: &str, error: ExchangeError) -> DataError {
        match error {
            ExchangeError::RateLimited { retry_after } => {
                let mut throttle = self.throttle.lock();
                let delay = throttle
                    .backoff
                    .next_delay()
                    .max(retry_after.unwrap_or_default());
                throttle.blocked_until = Some(Instant::now() + delay);
                warn!(symbol, ?delay, "rate limited by exchange, backing off");
                DataError::RateLimited { backoff: delay }
            }
            ExchangeError::InvalidSymbol(s) => DataError::InvalidSymbol(s),
            ExchangeError::Unauthorized(reason) => DataError::Unauthorized(reason),
            other => DataError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
