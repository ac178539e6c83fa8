// src/config.rs

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    SmaCross {
        short_window: usize,
        long_window: usize,
    },
    Momentum {
        lookback: usize,
        threshold_pct: f64,
    },
    Scalper {
        lookback: usize,
        target_drop_pct: f64,
        target_profit_pct: f64,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::SmaCross {
            short_window: 7,
            long_window: 25,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of available quote capital committed per entry.
    pub capital_fraction: Decimal,
    /// Hard cap on base quantity per position.
    pub max_position_size: Decimal,
    pub min_notional: Decimal,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    /// Marketable-limit offset from the reference price; zero sends market orders.
    pub slippage_guard_pct: Decimal,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub quote_asset: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            capital_fraction: Decimal::new(10, 2),
            max_position_size: Decimal::new(1, 1),
            min_notional: Decimal::new(55, 1),
            step_size: Decimal::new(1, 5),
            tick_size: Decimal::new(1, 2),
            slippage_guard_pct: Decimal::new(1, 3),
            stop_loss_pct: Some(0.02),
            take_profit_pct: Some(0.03),
            quote_asset: "USDT".to_string(),
        }
    }
}

/// Everything a single Start needs. Read once; a running bot never sees changes.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    pub symbols: Vec<String>,
    pub candle_interval: String,
    /// Candles handed to the strategy each tick.
    pub lookback: usize,
    pub tick_interval_secs: u64,
    pub order_timeout_ms: u64,
    pub reconcile_attempts: u32,
    pub reconcile_delay_ms: u64,
    pub order_id_prefix: String,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            candle_interval: "1m".to_string(),
            lookback: 50,
            tick_interval_secs: 60,
            order_timeout_ms: 5_000,
            reconcile_attempts: 3,
            reconcile_delay_ms: 500,
            order_id_prefix: "cb".to_string(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("at least one symbol is required".into());
        }
        if self.lookback == 0 {
            return Err("lookback must be positive".into());
        }
        if self.tick_interval_secs == 0 {
            return Err("tick_interval_secs must be positive".into());
        }
        if self.order_id_prefix.is_empty() || self.order_id_prefix.len() > 8 {
            return Err("order_id_prefix must be 1..=8 characters".into());
        }
        let fraction = self.risk.capital_fraction;
        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            return Err(format!("capital_fraction {} outside (0, 1]", fraction));
        }
        if self.risk.max_position_size <= Decimal::ZERO {
            return Err("max_position_size must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Paper trading unless explicitly enabled.
    pub live_trading: bool,
    /// Quote balance the paper venue starts with.
    pub paper_balance: Decimal,
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub request_timeout_ms: u64,
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            live_trading: false,
            paper_balance: Decimal::from(10_000),
            base_url: "https://api.binance.com".to_string(),
            api_key: String::new(),
            secret_key: String::new(),
            request_timeout_ms: 10_000,
            recv_window_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Minimum spacing between outbound requests.
    pub min_request_spacing_ms: u64,
    pub cache_ttl_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            min_request_spacing_ms: 250,
            cache_ttl_ms: 1_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: Decimal,
    pub fee_bps: Decimal,
    pub slippage_bps: Decimal,
    pub num_candles: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(10_000),
            fee_bps: Decimal::ZERO,
            slippage_bps: Decimal::ZERO,
            num_candles: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub market_data: MarketDataConfig,
    pub bot: BotConfig,
    pub backtest: BacktestConfig,
}

impl AppConfig {
    /// `Settings.toml` (optional) overlaid with `APP__SECTION__KEY` variables.
    /// Credentials fall back to `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bot.symbols")
                    .try_parsing(true),
            );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        if config.exchange.api_key.is_empty() {
            config.exchange.api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        }
        if config.exchange.secret_key.is_empty() {
            config.exchange.secret_key = std::env::var("BINANCE_SECRET_KEY").unwrap_or_default();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_are_valid() {
        assert!(BotConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_fraction() {
        let mut cfg = BotConfig::default();
        cfg.risk.capital_fraction = Decimal::from(2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_tagged_strategy_from_toml() {
        let raw = r#"
            [bot]
            symbols = ["ETHUSDT", "BTCUSDT"]
            tick_interval_secs = 30

            [bot.strategy]
            type = "momentum"
            lookback = 10
            threshold_pct = 0.005
        "#;
        let cfg: AppConfig = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.bot.symbols, vec!["ETHUSDT", "BTCUSDT"]);
        assert_eq!(cfg.bot.tick_interval(), Duration::from_secs(30));
        assert_eq!(
            cfg.bot.strategy,
            StrategyConfig::Momentum {
                lookback: 10,
                threshold_pct: 0.005
            }
        );
        assert_eq!(cfg.bot.lookback, 50);
        assert!(!cfg.exchange.live_trading);
    }
}
