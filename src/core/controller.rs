// src/core/controller.rs
use crate::config::{BacktestConfig, BotConfig, MarketDataConfig};
use crate::connectors::traits::ExchangeClient;
use crate::core::backtest::{BacktestEngine, BacktestReport};
use crate::core::engine::{ExecutionEngine, ExecutionPolicy};
use crate::core::fill_model::FillModel;
use crate::core::ledger::{LedgerView, PositionLedger};
use crate::core::market_data::MarketDataSource;
use crate::core::sizing::OrderPlanner;
use crate::error::{BacktestError, BotError, ErrorClass};
use crate::strategies::build_strategy;
use crate::strategies::traits::BoxedStrategy;
use crate::types::{BotState, BotStatus, Signal};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Most candles one klines request may return.
const MAX_HISTORY: usize = 1000;

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<ExecutionEngine>,
}

/// Owned by whoever holds the lifecycle lock. The engine lives here while
/// idle and moves into the loop task while running.
#[derive(Default)]
struct Lifecycle {
    engine: Option<ExecutionEngine>,
    running: Option<RunningLoop>,
}

/// Owns the bot lifecycle and the evaluation loop.
///
/// State and status details live in one `watch` value, so every publish swaps
/// both together and [`BotController::status`] never waits on the loop.
/// Transitions out of `Idle` and `Running` are compare-and-set operations on
/// that value; a caller that loses the race gets the current status back.
pub struct BotController {
    exchange: Arc<dyn ExchangeClient>,
    market_data: Arc<MarketDataSource>,
    status_tx: Arc<watch::Sender<BotStatus>>,
    lifecycle: Mutex<Lifecycle>,
    ledger: LedgerView,
}

impl BotController {
    pub fn new(exchange: Arc<dyn ExchangeClient>, market_data: &MarketDataConfig) -> Self {
        let (status_tx, _) = watch::channel(BotStatus::idle());
        let ledger = PositionLedger::new();
        let view = ledger.view();
        let defaults = BotConfig::default();
        let engine = ExecutionEngine::new(
            Arc::clone(&exchange),
            OrderPlanner::new(defaults.risk.clone(), defaults.order_id_prefix.clone()),
            ExecutionPolicy::from(&defaults),
            ledger,
        );

        Self {
            market_data: Arc::new(MarketDataSource::new(Arc::clone(&exchange), market_data)),
            exchange,
            status_tx: Arc::new(status_tx),
            lifecycle: Mutex::new(Lifecycle {
                engine: Some(engine),
                running: None,
            }),
            ledger: view,
        }
    }

    pub fn exchange_name(&self) -> &str {
        self.exchange.name()
    }

    pub fn status(&self) -> BotStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BotStatus> {
        self.status_tx.subscribe()
    }

    /// Idle -> Starting -> Running. Any other state is returned unchanged.
    pub async fn start(&self, config: BotConfig) -> Result<BotStatus, BotError> {
        let current = self.status();
        if current.state != BotState::Idle {
            debug!(state = %current.state, "start ignored");
            return Ok(current);
        }

        config.validate().map_err(BotError::Config)?;
        let strategy = build_strategy(&config.strategy, &config.risk)?;
        if config.lookback < strategy.min_window() {
            return Err(BotError::Config(format!(
                "lookback {} is shorter than {} needs ({})",
                config.lookback,
                strategy.name(),
                strategy.min_window()
            )));
        }

        let won = self.status_tx.send_if_modified(|status| {
            if status.state != BotState::Idle {
                return false;
            }
            status.state = BotState::Starting;
            status.last_error = None;
            true
        });
        if !won {
            return Ok(self.status());
        }

        let mut lifecycle = self.lifecycle.lock().await;
        let planner = OrderPlanner::new(config.risk.clone(), config.order_id_prefix.clone());
        let policy = ExecutionPolicy::from(&config);
        let engine = match lifecycle.engine.take() {
            Some(mut engine) => {
                engine.reconfigure(planner, policy);
                engine
            }
            None => ExecutionEngine::new(
                Arc::clone(&self.exchange),
                planner,
                policy,
                self.ledger.clone().into_writer(),
            ),
        };

        info!(
            strategy = strategy.name(),
            symbols = ?config.symbols,
            interval = ?config.tick_interval(),
            exchange = self.exchange.name(),
            "Starting bot"
        );

        // published before the loop exists so the loop can only ever move
        // Running -> Error, never race the Starting -> Running step
        self.status_tx.send_modify(|status| status.state = BotState::Running);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bot_loop = BotLoop {
            config,
            strategy,
            market_data: Arc::clone(&self.market_data),
            engine,
            status_tx: Arc::clone(&self.status_tx),
            shutdown: shutdown_rx,
        };
        lifecycle.running = Some(RunningLoop {
            shutdown: shutdown_tx,
            handle: tokio::spawn(bot_loop.run()),
        });

        Ok(self.status())
    }

    /// Running | Error -> Stopping -> Idle, after the in-flight tick finishes.
    /// A caller that finds a stop already under way waits for it to complete.
    /// A no-op in any other state.
    pub async fn stop(&self) -> BotStatus {
        let won = self.status_tx.send_if_modified(|status| {
            if !matches!(status.state, BotState::Running | BotState::Error) {
                return false;
            }
            status.state = BotState::Stopping;
            true
        });
        if !won {
            let mut updates = self.subscribe();
            // another caller owns the stop; return once it has finished
            if updates.borrow().state == BotState::Stopping {
                let _ = updates
                    .wait_for(|status| status.state != BotState::Stopping)
                    .await;
            }
            return self.status();
        }

        info!("Stopping bot, waiting for the current tick");
        let mut lifecycle = self.lifecycle.lock().await;
        let mut failure = None;
        if let Some(running) = lifecycle.running.take() {
            // the loop may already have exited on its own
            let _ = running.shutdown.send(true);
            match running.handle.await {
                Ok(engine) => lifecycle.engine = Some(engine),
                Err(e) => {
                    error!(error = %e, "evaluation loop did not exit cleanly");
                    failure = Some(BotError::TaskPanicked(e.to_string()).to_string());
                }
            }
        }

        self.status_tx.send_modify(|status| {
            status.state = BotState::Idle;
            if failure.is_some() {
                status.last_error = failure;
            }
        });
        info!("Bot stopped");
        self.status()
    }

    /// Leaves `Error` (or any running state) for `Idle`.
    pub async fn reset(&self) -> BotStatus {
        self.stop().await
    }

    /// Replays recent history of the first configured symbol. Independent of
    /// the live loop and its ledger.
    pub async fn run_backtest(
        &self,
        bot: &BotConfig,
        backtest: &BacktestConfig,
    ) -> Result<BacktestReport, BotError> {
        bot.validate().map_err(BotError::Config)?;
        let strategy = build_strategy(&bot.strategy, &bot.risk)?;
        let symbol = bot
            .symbols
            .first()
            .ok_or_else(|| BotError::Config("no symbol to backtest".into()))?;

        let limit = backtest.num_candles.clamp(1, MAX_HISTORY);
        let history = self
            .market_data
            .fetch_recent(symbol, &bot.candle_interval, limit)
            .await
            .map_err(BacktestError::from)?;
        info!(%symbol, candles = history.len(), strategy = strategy.name(), "Running backtest");

        let engine = BacktestEngine::new(
            OrderPlanner::new(bot.risk.clone(), bot.order_id_prefix.clone()),
            FillModel::new(backtest.slippage_bps, backtest.fee_bps),
            Some(bot.lookback),
        );
        let capital = backtest.initial_capital;

        let report = tokio::task::spawn_blocking(move || {
            engine.run(history.as_slice(), strategy.as_ref(), capital)
        })
        .await
        .map_err(|e| BotError::TaskPanicked(e.to_string()))??;
        Ok(report)
    }
}

struct BotLoop {
    config: BotConfig,
    strategy: BoxedStrategy,
    market_data: Arc<MarketDataSource>,
    engine: ExecutionEngine,
    status_tx: Arc<watch::Sender<BotStatus>>,
    shutdown: watch::Receiver<bool>,
}

impl BotLoop {
    /// Ticks until told to stop or an unrecoverable failure. Shutdown is only
    /// observed between ticks. Hands the engine back on exit.
    async fn run(mut self) -> ExecutionEngine {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *self.shutdown.borrow() {
                break;
            }
            if !self.tick().await {
                break;
            }
        }

        debug!("evaluation loop exited");
        self.engine
    }

    /// One pass over every symbol, then a single status publish. Returns
    /// `false` when the loop must halt.
    async fn tick(&mut self) -> bool {
        let mut marks = HashMap::new();
        let mut last_signal = None;
        let mut last_error = None;
        let mut halt = false;

        for symbol in self.config.symbols.clone() {
            if let Err(e) = self
                .tick_symbol(&symbol, &mut marks, &mut last_signal)
                .await
            {
                let class = e.class();
                match class {
                    ErrorClass::Unrecoverable => error!(%symbol, error = %e, "unrecoverable failure, halting"),
                    ErrorClass::Ambiguous => error!(%symbol, error = %e, "order outcome unresolved"),
                    ErrorClass::Permanent => warn!(%symbol, error = %e, "tick failed"),
                    ErrorClass::Transient => warn!(%symbol, error = %e, "tick failed, retrying next tick"),
                }
                last_error = Some(format!("{}: {}", symbol, e));
                if class == ErrorClass::Unrecoverable {
                    halt = true;
                    break;
                }
            }
        }

        let positions = self.engine.ledger_view().snapshot_marked(&marks);
        let now = Utc::now();
        self.status_tx.send_modify(|status| {
            status.last_tick_at = Some(now);
            status.ticks += 1;
            status.positions = positions;
            if last_signal.is_some() {
                status.last_signal = last_signal;
            }
            if last_error.is_some() {
                status.last_error = last_error;
            }
            if halt && status.state == BotState::Running {
                status.state = BotState::Error;
            }
        });
        !halt
    }

    async fn tick_symbol(
        &mut self,
        symbol: &str,
        marks: &mut HashMap<String, Decimal>,
        last_signal: &mut Option<Signal>,
    ) -> Result<(), BotError> {
        let series = self
            .market_data
            .fetch_recent(symbol, &self.config.candle_interval, self.config.lookback)
            .await?;
        if let Some(last) = series.last() {
            marks.insert(symbol.to_string(), last.close);
        }

        let position = self.engine.position(symbol);
        let signal = self.strategy.evaluate(series.as_slice(), &position)?;
        debug!(
            %symbol,
            action = ?signal.action,
            confidence = signal.confidence,
            price = %signal.reference_price,
            "signal"
        );
        *last_signal = Some(signal.clone());

        if let Some(result) = self.engine.execute(&signal, &position).await? {
            debug!(key = %result.key, status = ?result.status, "order settled");
        }
        Ok(())
    }
}
