use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::{
    event::{AppEvent, EventHandler},
    state::AppState,
    ui::draw_ui,
};
use crate::{
    core::{
        console::Console,
        history::CommandHistory,
        pipeline::CommandPipeline,
        session::SessionManager,
    },
    domain::{
        config::MoonriverConfig,
        error::{ConnectError, MoonriverError, MoonriverResult},
    },
    infrastructure::{
        history_store::{history_path, load_history, save_history},
        websocket::WebSocketConnector,
    },
};

type ConnectResults = Vec<(String, Result<(), ConnectError>)>;

/// Run the interactive console until the operator quits.
///
/// Every configured printer is dialled in the background; the console is
/// usable (and `:connect` works) while that is still going on. History is
/// loaded before and saved after.
pub async fn run(config: MoonriverConfig, active: Option<String>) -> MoonriverResult<()> {
    let history_file = history_path(&config.global);
    let limit = config.global.history_limit;
    let history = match &history_file {
        Some(path) => load_history(path, limit),
        None => CommandHistory::new(limit),
    };

    let manager = Arc::new(SessionManager::new(Arc::new(config), Arc::new(WebSocketConnector)));
    let (connected_tx, connected_rx) = oneshot::channel();
    let connecting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let _ = connected_tx.send(manager.connect_all().await);
        })
    };

    let console = Console::new(CommandPipeline::new(Arc::clone(&manager)), history, active);
    let mut app = App::new(console, connected_rx)?;
    let result = app.run().await;
    let history = app.close();

    connecting.abort();
    manager.shutdown().await;
    if let Some(path) = history_file {
        if let Err(e) = save_history(&path, &history) {
            warn!("Could not save history to {}: {}", path.display(), e);
        }
    }
    result
}

/// Restores the terminal however the app exits
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

pub struct App {
    console: Console,
    state: AppState,
    handler: EventHandler,
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    should_quit: bool,
    last_tick: Instant,
    tick_rate: Duration,
    connecting: Option<oneshot::Receiver<ConnectResults>>,
    _guard: TerminalGuard,
}

impl App {
    fn new(console: Console, connecting: oneshot::Receiver<ConnectResults>) -> MoonriverResult<Self> {
        // Setup terminal
        enable_raw_mode().map_err(|e| MoonriverError::TuiError(e.to_string()))?;
        let guard = TerminalGuard;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).map_err(|e| MoonriverError::TuiError(e.to_string()))?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).map_err(|e| MoonriverError::TuiError(e.to_string()))?;
        terminal.hide_cursor().map_err(|e| MoonriverError::TuiError(e.to_string()))?;

        Ok(Self {
            console,
            state: AppState::new(),
            handler: EventHandler::new(),
            terminal,
            should_quit: false,
            last_tick: Instant::now(),
            tick_rate: Duration::from_millis(100),
            connecting: Some(connecting),
            _guard: guard,
        })
    }

    pub async fn run(&mut self) -> MoonriverResult<()> {
        info!("Console started");
        loop {
            self.state.update(self.console.render_state());
            self.terminal
                .draw(|f| draw_ui(f, &mut self.state))
                .map_err(|e| MoonriverError::TuiError(e.to_string()))?;

            // Handle events
            let timeout = self.tick_rate.saturating_sub(self.last_tick.elapsed());
            if event::poll(timeout).map_err(|e| MoonriverError::TuiError(e.to_string()))? {
                match event::read().map_err(|e| MoonriverError::TuiError(e.to_string()))? {
                    Event::Key(key) => {
                        let app_event = self
                            .handler
                            .handle_key_event(key, &mut self.state, self.console.history());
                        if let Some(app_event) = app_event {
                            self.dispatch(app_event).await;
                        }
                    }
                    Event::Resize(width, height) => {
                        self.state.terminal_size = (width, height);
                    }
                    _ => {}
                }
            }

            // Tick
            if self.last_tick.elapsed() >= self.tick_rate {
                self.tick().await;
                self.last_tick = Instant::now();
            }

            if self.should_quit || self.console.should_quit() {
                break;
            }
        }

        info!("Console closed");
        Ok(())
    }

    /// Hand back the history; the terminal is restored when the app drops
    pub fn close(self) -> CommandHistory {
        self.console.close()
    }

    async fn dispatch(&mut self, event: AppEvent) {
        match event {
            AppEvent::Quit => self.should_quit = true,
            AppEvent::EmergencyStop => self.console.emergency_stop().await,
            AppEvent::Submit(line) => {
                self.state.status_message = None;
                self.console.submit(&line).await;
            }
            AppEvent::InputChanged => self.console.set_input(self.state.input.content()),
            AppEvent::Complete => {
                self.console.set_input(self.state.input.content());
                if let Some(text) = self.console.complete() {
                    self.state.input.set(&text);
                }
            }
            AppEvent::AcceptCompletion => {
                if let Some(text) = self.console.accept_completion() {
                    self.state.input.set(&text);
                }
            }
            AppEvent::DismissCompletion => self.console.dismiss_completion(),
            AppEvent::Request(line) => self.console.request(line),
        }
    }

    async fn tick(&mut self) {
        self.console.poll().await;

        if let Some(receiver) = &mut self.connecting {
            match receiver.try_recv() {
                Ok(results) => {
                    self.connecting = None;
                    let failed: Vec<String> = results
                        .iter()
                        .filter_map(|(name, result)| result.as_ref().err().map(|e| format!("{}: {}", name, e)))
                        .collect();
                    let message = if failed.is_empty() {
                        format!("Connected to {} printer(s)", results.len())
                    } else {
                        format!("Not connected: {}", failed.join("; "))
                    };
                    self.state.set_status_message(message);
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => self.connecting = None,
            }
        }
    }
}
