// src/tui/mod.rs
use crate::config::AppConfig;
use crate::core::controller::BotController;
use crate::types::{BotState, BotStatus, Signal, SignalAction};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Terminal,
};
use std::sync::Arc;
use std::{io, time::Duration};
use tokio::sync::mpsc;

const MAX_LINES: usize = 20;

/// Results of control operations, delivered back to the UI thread.
pub enum UiEvent {
    Log(String),
    Backtest(String),
}

pub struct App {
    pub mode: String,
    pub status: BotStatus,
    pub signals: Vec<String>,
    pub logs: Vec<String>,
    pub backtest: Option<String>,
}

impl App {
    pub fn new(mode: String) -> Self {
        Self {
            mode,
            status: BotStatus::idle(),
            signals: Vec::new(),
            logs: Vec::new(),
            backtest: None,
        }
    }

    pub fn on_status(&mut self, status: BotStatus) {
        if let Some(signal) = &status.last_signal {
            let is_new = self.status.last_signal.as_ref() != Some(signal);
            if is_new && signal.action != SignalAction::Hold {
                push_bounded(&mut self.signals, describe(signal));
            }
        }
        self.status = status;
    }

    pub fn on_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Log(msg) => push_bounded(&mut self.logs, msg),
            UiEvent::Backtest(summary) => {
                push_bounded(&mut self.logs, "Backtest finished".to_string());
                self.backtest = Some(summary);
            }
        }
    }
}

fn push_bounded(lines: &mut Vec<String>, line: String) {
    lines.push(line);
    if lines.len() > MAX_LINES {
        lines.remove(0);
    }
}

fn describe(signal: &Signal) -> String {
    format!(
        "{} {:?} {} at ${} (confidence {:.2})",
        signal.timestamp.format("%H:%M"),
        signal.action,
        signal.symbol,
        signal.reference_price,
        signal.confidence
    )
}

/// Keys: `s` start, `x` stop, `r` reset, `b` backtest, `q` quit.
pub async fn run(controller: Arc<BotController>, config: AppConfig) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mode = if config.exchange.live_trading {
        "LIVE".to_string()
    } else {
        "PAPER".to_string()
    };
    let mut app = App::new(mode);
    let (tx, mut rx) = mpsc::channel(32);

    loop {
        app.on_status(controller.status());
        terminal.draw(|f| ui(f, &app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char('s') => {
                        let (ctrl, tx, bot) = (controller.clone(), tx.clone(), config.bot.clone());
                        tokio::spawn(async move {
                            let msg = match ctrl.start(bot).await {
                                Ok(status) => format!("Start: {}", status.state),
                                Err(e) => format!("Start failed: {}", e),
                            };
                            let _ = tx.send(UiEvent::Log(msg)).await;
                        });
                    }
                    KeyCode::Char('x') | KeyCode::Char('r') => {
                        let (ctrl, tx) = (controller.clone(), tx.clone());
                        tokio::spawn(async move {
                            let status = ctrl.stop().await;
                            let _ = tx.send(UiEvent::Log(format!("Stop: {}", status.state))).await;
                        });
                    }
                    KeyCode::Char('b') => {
                        let (ctrl, tx) = (controller.clone(), tx.clone());
                        let (bot, backtest) = (config.bot.clone(), config.backtest.clone());
                        tokio::spawn(async move {
                            let event = match ctrl.run_backtest(&bot, &backtest).await {
                                Ok(report) => UiEvent::Backtest(report.summary.to_string()),
                                Err(e) => UiEvent::Log(format!("Backtest failed: {}", e)),
                            };
                            let _ = tx.send(event).await;
                        });
                        app.on_event(UiEvent::Log("Backtest started".to_string()));
                    }
                    _ => {}
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            app.on_event(event);
        }
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    controller.stop().await;
    Ok(())
}

fn state_color(state: BotState) -> Color {
    match state {
        BotState::Running => Color::Green,
        BotState::Starting | BotState::Stopping => Color::Yellow,
        BotState::Error => Color::Red,
        BotState::Idle => Color::Gray,
    }
}

fn ui(f: &mut ratatui::Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(6),
                Constraint::Min(8),
                Constraint::Length(10),
            ]
            .as_ref(),
        )
        .split(f.size());

    let status = &app.status;
    let last_tick = status
        .last_tick_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!("Candle Bot [{}]", app.mode),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | State: "),
        Span::styled(
            status.state.to_string(),
            Style::default()
                .fg(state_color(status.state))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" | Ticks: {} | Last tick: {}", status.ticks, last_tick)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Status [s]tart [x]stop [r]eset [b]acktest [q]uit"),
    );
    f.render_widget(header, chunks[0]);

    let mut details: Vec<ListItem> = status
        .positions
        .iter()
        .map(|p| {
            ListItem::new(format!(
                "{}: qty {} @ {} | realized {:.2} | unrealized {:.2} | fees {:.4}",
                p.symbol, p.quantity, p.avg_entry_price, p.realized_pnl, p.unrealized_pnl, p.fees_paid
            ))
        })
        .collect();
    if let Some(err) = &status.last_error {
        details.push(ListItem::new(Line::from(Span::styled(
            format!("Last error: {}", err),
            Style::default().fg(Color::Red),
        ))));
    }
    let positions =
        List::new(details).block(Block::default().borders(Borders::ALL).title("Positions"));
    f.render_widget(positions, chunks[1]);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(chunks[2]);

    let signals: Vec<ListItem> = app
        .signals
        .iter()
        .rev()
        .map(|s| {
            ListItem::new(Line::from(Span::styled(
                s.as_str(),
                Style::default().fg(Color::Green),
            )))
        })
        .collect();
    let signals_list = List::new(signals).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Signals History"),
    );
    f.render_widget(signals_list, middle[0]);

    let backtest_text = app
        .backtest
        .clone()
        .unwrap_or_else(|| "Press [b] to backtest the configured strategy".to_string());
    let backtest = Paragraph::new(backtest_text)
        .block(Block::default().borders(Borders::ALL).title("Backtest"));
    f.render_widget(backtest, middle[1]);

    let logs: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .map(|s| ListItem::new(Line::from(Span::raw(s.as_str()))))
        .collect();

    let logs_list =
        List::new(logs).block(Block::default().borders(Borders::ALL).title("System Logs"));
    f.render_widget(logs_list, chunks[3]);
}
