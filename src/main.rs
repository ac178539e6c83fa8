// src/main.rs
use crate::config::AppConfig;
use crate::connectors::binance::BinanceClient;
use crate::connectors::paper::PaperExchange;
use crate::connectors::traits::ExchangeClient;
use crate::core::controller::BotController;
use crate::core::fill_model::FillModel;
use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{info, warn, Level};

mod config;
mod connectors;
mod core;
mod error;
mod strategies;
mod tui;
mod types;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // stdout belongs to the TUI, so logs go to a daily file
    let file_appender = tracing_appender::rolling::daily("logs", "candle_bot.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_max_level(Level::INFO)
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let live_trading = config.exchange.live_trading;

    let binance: Arc<dyn ExchangeClient> = Arc::new(
        BinanceClient::new(&config.exchange, &config.bot.risk.quote_asset)
            .context("failed to build exchange client")?,
    );
    let exchange: Arc<dyn ExchangeClient> = if live_trading {
        if config.exchange.api_key.is_empty() {
            warn!("Live trading enabled without API credentials");
        }
        binance
    } else {
        Arc::new(PaperExchange::new(
            binance,
            FillModel::new(config.backtest.slippage_bps, config.backtest.fee_bps),
            &config.bot.risk.quote_asset,
            config.exchange.paper_balance,
        ))
    };

    info!(
        live_trading,
        symbols = ?config.bot.symbols,
        "Candle bot starting"
    );
    let controller = Arc::new(BotController::new(exchange, &config.market_data));

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--backtest") {
        let report = controller
            .run_backtest(&config.bot, &config.backtest)
            .await?;
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
        return Ok(());
    }

    if args.iter().any(|a| a == "--headless") {
        println!(
            "Candle bot [{}] on {}: Ctrl+C to stop",
            if live_trading { "LIVE" } else { "PAPER" },
            controller.exchange_name()
        );
        let status = controller.start(config.bot.clone()).await?;
        println!("State: {}", status.state);

        let mut updates = controller.subscribe();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                res = &mut shutdown => {
                    res?;
                    break;
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = updates.borrow_and_update().clone();
                    println!(
                        "[{}] ticks={} last_error={}",
                        status.state,
                        status.ticks,
                        status.last_error.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        let status = controller.stop().await;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    tui::run(controller, config).await
}
