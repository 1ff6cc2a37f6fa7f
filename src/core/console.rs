//! The interactive console.
//!
//! [`Console`] owns what the terminal front end draws: the output feed, the
//! input line, completions and command history. Submitted lines go to a
//! pipeline task that runs them one at a time; emergency stops skip that task
//! and go to the session manager directly, so a busy pipeline never delays
//! them. Front ends pull a [`RenderState`] and watch a version counter to know
//! when to redraw.

use crate::core::assist::{tokenize, CompletionEngine, DynamicItems, LineCompletion, Token};
use crate::core::history::CommandHistory;
use crate::core::jobs::JobPage;
use crate::core::pipeline::{contains_emergency_stop, CommandPipeline, ConsoleContext, Outcome, BUILTIN_HELP};
use crate::core::printer::PrinterStatus;
use crate::core::session::{
    ConnectionState, EmergencyStopRecord, Session, SessionEvent, SessionManager, SessionSummary,
};
use crate::domain::error::PipelineError;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub const MAX_CONSOLE_LINES: usize = 1000;
const HISTORY_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineKind {
    /// Echo of what the operator entered
    Command,
    Response,
    /// Output the firmware printed on its own
    Gcode,
    Info,
    Error,
    EmergencyStop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleLine {
    pub kind: LineKind,
    pub printer: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterTab {
    pub name: String,
    pub state: ConnectionState,
}

/// Completion candidates on screen and the highlighted one
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPopup {
    pub completion: LineCompletion,
    pub selected: usize,
}

/// Everything needed to draw one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderState {
    pub version: u64,
    pub active: Option<String>,
    pub printers: Vec<PrinterTab>,
    /// Status of the active printer; `None` when it has no session
    pub status: Option<PrinterStatus>,
    pub lines: Vec<ConsoleLine>,
    pub input: String,
    pub tokens: Vec<Token>,
    pub completion: Option<CompletionPopup>,
    /// A submitted line is still running
    pub busy: bool,
    pub jobs: Option<(String, JobPage)>,
    pub last_emergency_stop: Option<EmergencyStopRecord>,
}

struct PipelineReply {
    outcome: Result<Outcome, PipelineError>,
    active: Option<String>,
}

struct Watcher {
    session: Session,
    events: broadcast::Receiver<SessionEvent>,
}

pub struct Console {
    manager: Arc<SessionManager>,
    history: CommandHistory,
    completion: CompletionEngine,
    dynamic: DynamicItems,
    lines: VecDeque<ConsoleLine>,
    input: String,
    popup: Option<CompletionPopup>,
    active: Option<String>,
    printers: Vec<PrinterTab>,
    status: Option<PrinterStatus>,
    status_version: Option<(String, u64)>,
    jobs: Option<(String, JobPage)>,
    last_emergency_stop: Option<EmergencyStopRecord>,
    busy: bool,
    quit: bool,
    watchers: HashMap<String, Watcher>,
    requests: mpsc::UnboundedSender<String>,
    replies: mpsc::UnboundedReceiver<PipelineReply>,
    runner: JoinHandle<()>,
    version: watch::Sender<u64>,
}

impl Console {
    /// Create a console and start its pipeline task
    pub fn new(pipeline: CommandPipeline, history: CommandHistory, active: Option<String>) -> Self {
        let manager = Arc::clone(pipeline.manager());
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, replies) = mpsc::unbounded_channel();
        let runner = tokio::spawn(run_pipeline(
            pipeline,
            ConsoleContext::new(active.clone()),
            request_rx,
            reply_tx,
        ));
        let (version, _) = watch::channel(0);

        Self {
            manager,
            history,
            completion: CompletionEngine::default(),
            dynamic: DynamicItems::default(),
            lines: VecDeque::new(),
            input: String::new(),
            popup: None,
            active,
            printers: Vec::new(),
            status: None,
            status_version: None,
            jobs: None,
            last_emergency_stop: None,
            busy: false,
            quit: false,
            watchers: HashMap::new(),
            requests,
            replies,
            runner,
            version,
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Receiver that changes whenever the render state does
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Submit an operator line.
    ///
    /// M112 goes straight to the emergency path. Anything else is refused
    /// while the previous line is still running.
    pub async fn submit(&mut self, line: &str) {
        let line = line.trim().to_string();
        self.input.clear();
        self.popup = None;
        if line.is_empty() {
            self.touch();
            return;
        }

        self.history.append(line.clone());
        let printer = self.active.clone();
        self.push(LineKind::Command, printer, line.clone());

        if contains_emergency_stop(&line) {
            self.emergency_stop().await;
            return;
        }
        self.request(line);
    }

    /// Run a line without recording it in history
    pub fn request(&mut self, line: impl Into<String>) {
        if self.busy {
            self.push(
                LineKind::Error,
                None,
                "Busy: waiting for the previous command (Ctrl+X for emergency stop)".to_string(),
            );
            return;
        }
        if self.requests.send(line.into()).is_err() {
            error!("Command pipeline task has stopped");
            self.push(LineKind::Error, None, "Command pipeline has stopped".to_string());
            return;
        }
        self.busy = true;
        self.touch();
    }

    /// Emergency stop the active printer, whatever the pipeline is doing
    pub async fn emergency_stop(&mut self) {
        let Some(printer) = self.active.clone() else {
            self.push(LineKind::Error, None, "Emergency stop: no active printer".to_string());
            return;
        };

        match self.manager.emergency_stop(&printer).await {
            Ok(record) => self.record_emergency_stop(record),
            Err(e) => self.push(LineKind::Error, Some(printer), e.to_string()),
        }
    }

    pub fn set_input(&mut self, text: &str) {
        if self.input != text {
            self.input = text.to_string();
            self.popup = None;
            self.touch();
        }
    }

    /// Tab: complete the word at the end of the input.
    ///
    /// A single candidate is applied and the new input returned. Several
    /// candidates open a popup; further calls move its selection.
    pub fn complete(&mut self) -> Option<String> {
        if let Some(popup) = &mut self.popup {
            popup.selected = (popup.selected + 1) % popup.completion.candidates.len().max(1);
            self.touch();
            return None;
        }

        let completion = self.completion.complete_line(&self.input, &self.dynamic);
        match completion.candidates.len() {
            0 => None,
            1 => {
                let text = completion.apply(&self.input, 0)?;
                self.set_input(&text);
                Some(text)
            }
            _ => {
                self.popup = Some(CompletionPopup {
                    completion,
                    selected: 0,
                });
                self.touch();
                None
            }
        }
    }

    pub fn has_completion(&self) -> bool {
        self.popup.is_some()
    }

    /// Apply the selected popup candidate
    pub fn accept_completion(&mut self) -> Option<String> {
        let popup = self.popup.take()?;
        let text = popup.completion.apply(&self.input, popup.selected)?;
        self.set_input(&text);
        Some(text)
    }

    pub fn dismiss_completion(&mut self) {
        if self.popup.take().is_some() {
            self.touch();
        }
    }

    /// Pick up pipeline results, session events and status changes.
    /// Returns true if anything visible changed.
    pub async fn poll(&mut self) -> bool {
        let before = *self.version.borrow();

        while let Ok(reply) = self.replies.try_recv() {
            self.busy = false;
            self.active = reply.active;
            match reply.outcome {
                Ok(outcome) => self.show(outcome),
                Err(e) => self.push(LineKind::Error, None, e.to_string()),
            }
        }

        self.drain_events().await;
        self.refresh_status().await;

        *self.version.borrow() != before
    }

    pub fn render_state(&self) -> RenderState {
        RenderState {
            version: *self.version.borrow(),
            active: self.active.clone(),
            printers: self.printers.clone(),
            status: self.status.clone(),
            lines: self.lines.iter().cloned().collect(),
            input: self.input.clone(),
            tokens: tokenize(&self.input),
            completion: self.popup.clone(),
            busy: self.busy,
            jobs: self.jobs.clone(),
            last_emergency_stop: self.last_emergency_stop.clone(),
        }
    }

    /// Stop the pipeline task and hand back the history for saving
    pub fn close(self) -> CommandHistory {
        self.runner.abort();
        self.history
    }

    fn show(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Nothing => {}
            Outcome::Switched { printer, .. } => {
                self.push(LineKind::Info, None, format!("Active printer: {}", printer));
                self.status_version = None;
            }
            Outcome::Printers(summaries) => {
                if summaries.is_empty() {
                    self.push(LineKind::Info, None, "No printers configured".to_string());
                }
                for summary in summaries {
                    let line = self.describe(&summary);
                    self.push(LineKind::Info, None, line);
                }
            }
            Outcome::Firmware(reports) => {
                for report in reports {
                    match report.result {
                        Ok(text) => self.push(LineKind::Response, Some(report.printer), text),
                        Err(e) => self.push(
                            LineKind::Error,
                            Some(report.printer),
                            format!("{}: {}", report.command, e),
                        ),
                    }
                }
            }
            Outcome::Jobs { printer, page } => {
                let shown = format!(
                    "{} of {} jobs{}",
                    page.jobs.len(),
                    page.total,
                    if page.next.is_some() { " (:jobs next for more)" } else { "" }
                );
                self.push(LineKind::Info, Some(printer.clone()), shown);
                self.jobs = Some((printer, page));
            }
            Outcome::SearchHistory(query) => {
                let query = query.unwrap_or_default();
                let matches: Vec<String> = self
                    .history
                    .search(&query)
                    .take(HISTORY_SEARCH_LIMIT)
                    .map(str::to_string)
                    .collect();
                if matches.is_empty() {
                    self.push(LineKind::Info, None, "No matching history".to_string());
                }
                for line in matches {
                    self.push(LineKind::Info, None, line);
                }
            }
            Outcome::EmergencyStop(record) => self.record_emergency_stop(record),
            Outcome::Connected(printer) => {
                self.push(LineKind::Info, Some(printer.clone()), format!("Connected to '{}'", printer))
            }
            Outcome::Disconnected { printer, existed } => {
                let text = if existed {
                    format!("Disconnected from '{}'", printer)
                } else {
                    format!("'{}' was not connected", printer)
                };
                self.push(LineKind::Info, Some(printer), text);
            }
            Outcome::Control { printer, summary } => self.push(LineKind::Info, Some(printer), summary),
            Outcome::PrintStarted { printer, filename } => {
                self.push(LineKind::Info, Some(printer), format!("Started printing {}", filename))
            }
            Outcome::PowerDevices { printer, devices } => {
                if devices.is_empty() {
                    self.push(LineKind::Info, Some(printer.clone()), "No power devices".to_string());
                }
                for device in devices {
                    let lock = if device.locked_while_printing { " (locked while printing)" } else { "" };
                    let line = format!("{:<16} {:<4} {}{}", device.device, device.status, device.kind, lock);
                    self.push(LineKind::Info, Some(printer.clone()), line);
                }
            }
            Outcome::PowerSwitched { printer, device, status } => {
                self.push(LineKind::Info, Some(printer), format!("Power device {} is {}", device, status))
            }
            Outcome::Help => {
                for (usage, text) in BUILTIN_HELP {
                    self.push(LineKind::Info, None, format!("{:<26} {}", usage, text));
                }
            }
            Outcome::Quit => {
                self.quit = true;
                self.touch();
            }
        }
    }

    fn describe(&self, summary: &SessionSummary) -> String {
        let marker = if self.active.as_deref() == Some(summary.name.as_str()) {
            '*'
        } else {
            ' '
        };
        format!(
            "{} {:<12} {:<18} {}",
            marker, summary.name, summary.state.to_string(), summary.endpoint
        )
    }

    fn record_emergency_stop(&mut self, record: EmergencyStopRecord) {
        let text = format!(
            "EMERGENCY STOP sent to '{}' (written in {:?})",
            record.printer, record.write_latency
        );
        self.push(LineKind::EmergencyStop, Some(record.printer.clone()), text);
        self.last_emergency_stop = Some(record);
    }

    async fn drain_events(&mut self) {
        let sessions = self.manager.sessions().await;
        self.watchers.retain(|_, watcher| {
            sessions
                .iter()
                .any(|session| session.same_session(&watcher.session))
        });
        for session in sessions {
            self.watchers
                .entry(session.name().to_string())
                .or_insert_with(|| Watcher {
                    events: session.events(),
                    session,
                });
        }

        let mut pending = Vec::new();
        for (name, watcher) in &mut self.watchers {
            loop {
                match watcher.events.try_recv() {
                    Ok(event) => pending.push((name.clone(), event)),
                    Err(TryRecvError::Lagged(skipped)) => {
                        debug!("Console skipped {} events from '{}'", skipped, name);
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }

        for (printer, event) in pending {
            match event {
                SessionEvent::GcodeResponse(text) => self.push(LineKind::Gcode, Some(printer), text),
                SessionEvent::StateChanged(state) => {
                    self.push(LineKind::Info, Some(printer), format!("Connection {}", state))
                }
                SessionEvent::Klippy(state) => {
                    self.push(LineKind::Info, Some(printer), format!("Klippy {}", state.as_str()))
                }
                SessionEvent::JobChanged { .. } | SessionEvent::Resubscribed => {}
            }
        }
    }

    async fn refresh_status(&mut self) {
        let summaries = self.manager.summaries().await;
        let printers: Vec<PrinterTab> = summaries
            .iter()
            .map(|summary| PrinterTab {
                name: summary.name.clone(),
                state: summary.state,
            })
            .collect();
        if printers != self.printers {
            self.printers = printers;
            self.touch();
        }

        let session = match &self.active {
            Some(name) => self.manager.get(name).await,
            None => None,
        };
        let Some(session) = session else {
            if self.status.take().is_some() {
                self.status_version = None;
                self.touch();
            }
            return;
        };

        let seen = (session.name().to_string(), session.store().version());
        if self.status_version.as_ref() == Some(&seen) {
            return;
        }

        self.status = Some(PrinterStatus::from_snapshot(&session.store().snapshot()));
        self.status_version = Some(seen);

        let capabilities = session.capabilities();
        let objects: BTreeSet<String> = capabilities
            .objects
            .into_iter()
            .chain(session.store().names())
            .collect();
        self.dynamic = DynamicItems {
            macros: capabilities.macros,
            objects: objects.into_iter().collect(),
            printers: summaries.into_iter().map(|summary| summary.name).collect(),
        };
        self.touch();
    }

    fn push(&mut self, kind: LineKind, printer: Option<String>, text: String) {
        self.lines.push_back(ConsoleLine { kind, printer, text });
        while self.lines.len() > MAX_CONSOLE_LINES {
            self.lines.pop_front();
        }
        self.touch();
    }

    fn touch(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

async fn run_pipeline(
    mut pipeline: CommandPipeline,
    mut ctx: ConsoleContext,
    mut requests: mpsc::UnboundedReceiver<String>,
    replies: mpsc::UnboundedSender<PipelineReply>,
) {
    while let Some(line) = requests.recv().await {
        let outcome = pipeline.submit_line(&mut ctx, &line).await;
        let reply = PipelineReply {
            outcome,
            active: ctx.active().map(str::to_string),
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
    debug!("Command pipeline task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::communication::transport::memory::{klipper_reply, MemoryConnector};
    use crate::domain::config::{MoonriverConfig, PrinterConfig};
    use std::time::Duration;

    async fn console() -> Console {
        let mut config = MoonriverConfig::default();
        config.printers.push(PrinterConfig {
            name: "voron".to_string(),
            url: "memory://voron".to_string(),
            api_key: None,
            request_timeout_ms: None,
        });
        let (connector, peers) = MemoryConnector::new();
        peers.serve(klipper_reply);

        let manager = Arc::new(SessionManager::new(Arc::new(config), Arc::new(connector)));
        manager.connect("voron").await.unwrap();
        let pipeline = CommandPipeline::new(manager);
        Console::new(pipeline, CommandHistory::new(100), Some("voron".to_string()))
    }

    async fn settle(console: &mut Console) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                console.poll().await;
                if !console.is_busy() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    fn texts(console: &Console, kind: LineKind) -> Vec<String> {
        console
            .render_state()
            .lines
            .into_iter()
            .filter(|line| line.kind == kind)
            .map(|line| line.text)
            .collect()
    }

    #[tokio::test]
    async fn test_firmware_command_round_trip() {
        let mut console = console().await;
        let mut changes = console.changes();

        console.submit("G28").await;
        assert!(console.is_busy());
        settle(&mut console).await;

        assert!(changes.has_changed().unwrap());
        assert_eq!(texts(&console, LineKind::Command), vec!["G28"]);
        assert_eq!(texts(&console, LineKind::Response), vec!["ok"]);
        assert_eq!(console.history().len(), 1);
    }

    #[tokio::test]
    async fn test_emergency_stop_skips_busy_pipeline() {
        let mut console = console().await;
        console.submit("G4 P10").await;
        console.submit("M112").await;

        assert!(console.render_state().last_emergency_stop.is_some());
        assert_eq!(texts(&console, LineKind::EmergencyStop).len(), 1);
        settle(&mut console).await;
    }

    #[tokio::test]
    async fn test_busy_console_refuses_lines() {
        let mut console = console().await;
        console.submit("G28").await;
        console.submit("G1 X10").await;

        let errors = texts(&console, LineKind::Error);
        assert!(errors[0].starts_with("Busy"));
        settle(&mut console).await;
    }

    #[tokio::test]
    async fn test_history_search_builtin() {
        let mut console = console().await;
        for line in ["M104 S200", "G28", "M104 S210"] {
            console.submit(line).await;
            settle(&mut console).await;
        }
        console.submit(":history M104").await;
        settle(&mut console).await;

        let info = texts(&console, LineKind::Info);
        let position = info.iter().position(|line| line == "M104 S210").unwrap();
        assert_eq!(info[position + 1], "M104 S200");
    }

    #[tokio::test]
    async fn test_status_and_completion_follow_active_printer() {
        let mut console = console().await;
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                console.poll().await;
                let ready = console
                    .render_state()
                    .status
                    .is_some_and(|status| status.extruder.is_some());
                if ready {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let state = console.render_state();
        assert_eq!(state.printers[0].state, ConnectionState::Connected);
        assert_eq!(state.status.unwrap().extruder.unwrap().temperature, 24.5);

        console.set_input("PRINT_S");
        assert_eq!(console.complete().as_deref(), Some("PRINT_START"));

        console.set_input("G");
        assert!(console.complete().is_none());
        assert!(console.has_completion());
        assert_eq!(console.accept_completion().as_deref(), Some("G0"));
    }

    #[tokio::test]
    async fn test_quit_builtin() {
        let mut console = console().await;
        console.submit(":quit").await;
        settle(&mut console).await;
        assert!(console.should_quit());
    }
}
