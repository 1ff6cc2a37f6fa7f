use super::context::ConsoleContext;
use super::parser::{parse_line, Builtin, Input, JobsAction};
use crate::core::controls::{self, PowerCommand, PowerDevice};
use crate::core::jobs::{JobHistoryBrowser, JobPage, PageToken, DEFAULT_PAGE_SIZE};
use crate::core::session::{EmergencyStopRecord, Session, SessionManager, SessionSummary};
use crate::domain::error::{MoonriverResult, PipelineError, RpcError};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

pub const METHOD_GCODE_SCRIPT: &str = "printer.gcode.script";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    AwaitingResponse,
    /// The last script stopped on an error; cleared by the next submission
    Aborted,
}

/// Result of one firmware command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub printer: String,
    pub command: String,
    pub result: Result<String, RpcError>,
}

/// What a submitted line did
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Nothing,
    Switched { printer: String, previous: Option<String> },
    Printers(Vec<SessionSummary>),
    /// Commands that were sent, in order; a failed command ends the list
    /// unless errors are skipped
    Firmware(Vec<CommandReport>),
    Jobs { printer: String, page: JobPage },
    /// History is owned by the console; the pipeline only asks for a search
    SearchHistory(Option<String>),
    EmergencyStop(EmergencyStopRecord),
    Connected(String),
    Disconnected { printer: String, existed: bool },
    /// A heater, fan or move control was accepted
    Control { printer: String, summary: String },
    PrintStarted { printer: String, filename: String },
    PowerDevices { printer: String, devices: Vec<PowerDevice> },
    PowerSwitched { printer: String, device: String, status: String },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFailure {
    pub line: usize,
    pub error: PipelineError,
}

/// Summary of a script that ran to its end
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptReport {
    /// Source lines consumed, including blanks and comments
    pub lines: usize,
    /// Firmware commands with the line they came from
    pub commands: Vec<(usize, CommandReport)>,
    /// Errors skipped because continue-on-error was set
    pub failures: Vec<ScriptFailure>,
    pub emergency_stops: Vec<EmergencyStopRecord>,
}

struct JobCursor {
    browser: JobHistoryBrowser,
    current: PageToken,
    next: Option<PageToken>,
}

impl JobCursor {
    fn new(session: Session) -> Self {
        Self {
            browser: JobHistoryBrowser::new(session, DEFAULT_PAGE_SIZE),
            current: PageToken::first(),
            next: None,
        }
    }
}

/// Turns operator input into built-in actions and firmware requests.
///
/// Commands run one at a time: each firmware command is awaited before the
/// next one is sent, so a target session never has more than one pipeline
/// request in flight.
pub struct CommandPipeline {
    manager: Arc<SessionManager>,
    continue_on_error: bool,
    command_timeout: Duration,
    state: PipelineState,
    jobs: HashMap<String, JobCursor>,
}

impl CommandPipeline {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let global = &manager.config().global;
        let continue_on_error = global.continue_on_error;
        let command_timeout = global.command_timeout();
        Self {
            manager,
            continue_on_error,
            command_timeout,
            state: PipelineState::Idle,
            jobs: HashMap::new(),
        }
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Execute one interactive line.
    ///
    /// Controller errors of firmware commands are part of the returned
    /// reports; the pipeline is idle again when this returns either way.
    pub async fn submit_line(&mut self, ctx: &mut ConsoleContext, raw: &str) -> Result<Outcome, PipelineError> {
        self.state = PipelineState::Idle;
        let result = self.dispatch(ctx, raw).await;
        self.state = PipelineState::Idle;
        result
    }

    async fn dispatch(&mut self, ctx: &mut ConsoleContext, raw: &str) -> Result<Outcome, PipelineError> {
        match parse_line(raw)? {
            Input::Empty | Input::Comment => Ok(Outcome::Nothing),
            Input::EmergencyStop => self.emergency_stop(ctx, None).await.map(Outcome::EmergencyStop),
            Input::Builtin(builtin) => self.builtin(ctx, builtin).await,
            Input::Firmware(commands) => {
                let session = self.active_session(ctx).await?;
                let mut reports = Vec::with_capacity(commands.len());
                for command in &commands {
                    let report = self.forward(&session, command).await;
                    let failed = report.result.is_err();
                    reports.push(report);
                    if failed && !self.continue_on_error {
                        break;
                    }
                }
                Ok(Outcome::Firmware(reports))
            }
        }
    }

    /// Run script lines in order. See [`CommandPipeline::run_script_observed`].
    pub async fn run_script<I, S>(&mut self, ctx: &mut ConsoleContext, lines: I) -> Result<ScriptReport, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_script_observed(ctx, lines, |_, _| {}).await
    }

    /// Run script lines in order, strictly one command at a time.
    ///
    /// By default the first failing line aborts the script and its error is
    /// returned with the line number; later lines are never sent. With
    /// continue-on-error the failure is recorded and execution goes on.
    /// `observe` sees every outcome as it happens, with its line number.
    pub async fn run_script_observed<I, S, F>(
        &mut self,
        ctx: &mut ConsoleContext,
        lines: I,
        mut observe: F,
    ) -> Result<ScriptReport, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(usize, &Outcome),
    {
        self.state = PipelineState::Idle;
        let mut report = ScriptReport::default();

        for (index, line) in lines.into_iter().enumerate() {
            let number = index + 1;
            report.lines = number;

            let input = match parse_line(line.as_ref()) {
                Ok(input) => input,
                Err(e) => {
                    self.failure(number, e, &mut report)?;
                    continue;
                }
            };

            match input {
                Input::Empty | Input::Comment => {}
                Input::Builtin(Builtin::Quit) => break,
                Input::EmergencyStop => match self.emergency_stop(ctx, None).await {
                    Ok(record) => {
                        let outcome = Outcome::EmergencyStop(record.clone());
                        observe(number, &outcome);
                        report.emergency_stops.push(record);
                    }
                    Err(e) => self.failure(number, e, &mut report)?,
                },
                Input::Builtin(builtin) => match self.builtin(ctx, builtin).await {
                    Ok(outcome) => observe(number, &outcome),
                    Err(e) => self.failure(number, e, &mut report)?,
                },
                Input::Firmware(commands) => {
                    let session = match self.active_session(ctx).await {
                        Ok(session) => session,
                        Err(e) => {
                            self.failure(number, e, &mut report)?;
                            continue;
                        }
                    };
                    for command in &commands {
                        let command_report = self.forward(&session, command).await;
                        observe(number, &Outcome::Firmware(vec![command_report.clone()]));
                        let result = command_report.result.clone();
                        report.commands.push((number, command_report));
                        if let Err(e) = result {
                            self.failure(number, PipelineError::Rpc(e), &mut report)?;
                            if !self.continue_on_error {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.state = PipelineState::Idle;
        info!(
            "Script finished: {} lines, {} commands, {} errors skipped",
            report.lines,
            report.commands.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Run a script read line by line from `source`
    pub async fn run_script_source<R>(&mut self, ctx: &mut ConsoleContext, source: R) -> MoonriverResult<ScriptReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = source.lines();
        let mut script = Vec::new();
        while let Some(line) = lines.next_line().await? {
            script.push(line);
        }
        Ok(self.run_script(ctx, script).await?)
    }

    /// Record or raise a script failure depending on policy
    fn failure(&mut self, line: usize, error: PipelineError, report: &mut ScriptReport) -> Result<(), PipelineError> {
        if self.continue_on_error {
            warn!("Script line {} failed, continuing: {}", line, error);
            report.failures.push(ScriptFailure { line, error });
            return Ok(());
        }

        self.state = PipelineState::Aborted;
        error!("Script aborted at line {}: {}", line, error);
        Err(match error {
            PipelineError::Rpc(source) => PipelineError::ScriptAborted { line, source },
            other => other,
        })
    }

    async fn forward(&mut self, session: &Session, command: &str) -> CommandReport {
        self.state = PipelineState::AwaitingResponse;
        debug!("Printer '{}' <- {}", session.name(), command);

        let result = session
            .send(METHOD_GCODE_SCRIPT, json!({ "script": command }), self.command_timeout)
            .await
            .map(|value| match value {
                Value::String(text) => text,
                other => other.to_string(),
            });
        if let Err(e) = &result {
            warn!("Printer '{}' rejected '{}': {}", session.name(), command, e);
        }

        CommandReport {
            printer: session.name().to_string(),
            command: command.to_string(),
            result,
        }
    }

    async fn builtin(&mut self, ctx: &mut ConsoleContext, builtin: Builtin) -> Result<Outcome, PipelineError> {
        match builtin {
            Builtin::Printer(printer) => {
                if !self.manager.is_configured(&printer) && self.manager.get(&printer).await.is_none() {
                    return Err(PipelineError::UnknownPrinter(printer));
                }
                let previous = ctx.switch_to(printer.clone());
                info!("Active printer is now '{}'", printer);
                Ok(Outcome::Switched { printer, previous })
            }
            Builtin::Printers => Ok(Outcome::Printers(self.manager.summaries().await)),
            Builtin::Connect(printer) => {
                if !self.manager.is_configured(&printer) {
                    return Err(PipelineError::UnknownPrinter(printer));
                }
                self.manager.connect(&printer).await?;
                if ctx.active().is_none() {
                    ctx.switch_to(printer.clone());
                }
                Ok(Outcome::Connected(printer))
            }
            Builtin::Disconnect(target) => {
                let printer = match target {
                    Some(printer) => printer,
                    None => ctx.active().ok_or(PipelineError::NoActivePrinter)?.to_string(),
                };
                self.jobs.remove(&printer);
                let existed = self.manager.disconnect(&printer).await;
                Ok(Outcome::Disconnected { printer, existed })
            }
            Builtin::Jobs(action) => self.jobs(ctx, action).await,
            Builtin::History(query) => Ok(Outcome::SearchHistory(query)),
            Builtin::Estop(target) => self.emergency_stop(ctx, target).await.map(Outcome::EmergencyStop),
            Builtin::Control(control) => {
                let session = self.active_session(ctx).await?;
                let report = self.forward(&session, &control.gcode()).await;
                report.result?;
                info!("Session '{}': {}", report.printer, control);
                Ok(Outcome::Control {
                    printer: report.printer,
                    summary: control.to_string(),
                })
            }
            Builtin::Print(filename) => self.start_print(ctx, filename).await,
            Builtin::Reprint(row) => {
                let filename = self.job_filename(ctx, row).await?;
                self.start_print(ctx, filename).await
            }
            Builtin::Power(command) => {
                let session = self.active_session(ctx).await?;
                let printer = session.name().to_string();
                match command {
                    PowerCommand::List => Ok(Outcome::PowerDevices {
                        printer,
                        devices: controls::power_devices(&session).await?,
                    }),
                    PowerCommand::Set { device, action } => {
                        let status = controls::set_power(&session, &device, action).await?;
                        Ok(Outcome::PowerSwitched { printer, device, status })
                    }
                }
            }
            Builtin::Help => Ok(Outcome::Help),
            Builtin::Quit => Ok(Outcome::Quit),
        }
    }

    async fn jobs(&mut self, ctx: &ConsoleContext, action: JobsAction) -> Result<Outcome, PipelineError> {
        let session = self.active_session(ctx).await?;
        let printer = session.name().to_string();

        let cursor = match self.jobs.entry(printer.clone()) {
            Entry::Occupied(entry) if entry.get().browser.session().same_session(&session) => entry.into_mut(),
            Entry::Occupied(mut entry) => {
                entry.insert(JobCursor::new(session));
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(JobCursor::new(session)),
        };

        let token = match action {
            JobsAction::Show => cursor.current,
            JobsAction::Next => cursor.next.unwrap_or(cursor.current),
            JobsAction::Reset => PageToken::first(),
        };
        let page = cursor.browser.list(token).await?;
        cursor.current = token;
        cursor.next = page.next;

        Ok(Outcome::Jobs { printer, page })
    }

    async fn start_print(&self, ctx: &ConsoleContext, filename: String) -> Result<Outcome, PipelineError> {
        let session = self.active_session(ctx).await?;
        controls::start_print(&session, &filename).await?;
        Ok(Outcome::PrintStarted {
            printer: session.name().to_string(),
            filename,
        })
    }

    /// File of the job at `row` on the page last shown for the active printer
    async fn job_filename(&mut self, ctx: &ConsoleContext, row: usize) -> Result<String, PipelineError> {
        let session = self.active_session(ctx).await?;
        let cursor = self
            .jobs
            .get_mut(session.name())
            .filter(|cursor| cursor.browser.session().same_session(&session))
            .ok_or_else(|| PipelineError::InvalidArguments("no job page shown yet, run :jobs first".to_string()))?;
        let page = cursor.browser.list(cursor.current).await?;
        row.checked_sub(1)
            .and_then(|index| page.jobs.get(index))
            .map(|job| job.filename.clone())
            .ok_or_else(|| {
                PipelineError::InvalidArguments(format!("the job page has {} jobs, not {}", page.jobs.len(), row))
            })
    }

    /// Stop `target`, or the active printer, through the emergency path
    async fn emergency_stop(
        &self,
        ctx: &ConsoleContext,
        target: Option<String>,
    ) -> Result<EmergencyStopRecord, PipelineError> {
        let printer = match target {
            Some(printer) => printer,
            None => ctx.active().ok_or(PipelineError::NoActivePrinter)?.to_string(),
        };
        Ok(self.manager.emergency_stop(&printer).await?)
    }

    async fn active_session(&self, ctx: &ConsoleContext) -> Result<Session, PipelineError> {
        let printer = ctx.active().ok_or(PipelineError::NoActivePrinter)?;
        match self.manager.get(printer).await {
            Some(session) => Ok(session),
            None if self.manager.is_configured(printer) => Err(PipelineError::Rpc(RpcError::ConnectionLost)),
            None => Err(PipelineError::UnknownPrinter(printer.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::communication::transport::memory::{klipper_reply, MemoryConnector, Reply};
    use crate::domain::config::{MoonriverConfig, PrinterConfig};
    use crate::domain::error::EmergencyStopError;
    use std::sync::Mutex;

    type Sent = Arc<Mutex<Vec<(String, Value)>>>;

    /// A manager connected to "voron", whose controller fails the script "B"
    async fn pipeline(continue_on_error: bool) -> (CommandPipeline, ConsoleContext, Sent) {
        let mut config = MoonriverConfig::default();
        config.global.continue_on_error = continue_on_error;
        config.printers.push(PrinterConfig {
            name: "voron".to_string(),
            url: "memory://voron".to_string(),
            api_key: None,
            request_timeout_ms: None,
        });

        let (connector, peers) = MemoryConnector::new();
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&sent);
        peers.serve(move |request| {
            log.lock()
                .unwrap()
                .push((request.method.clone(), request.params.clone()));
            match request.params["script"].as_str() {
                Some("B") => Reply::Error {
                    code: 400,
                    message: "Unknown command:\"B\"".to_string(),
                },
                _ if request.method == "server.history.list" => Reply::Result(json!({
                    "count": 1,
                    "jobs": [{"job_id": "000001", "filename": "benchy.gcode", "status": "completed"}]
                })),
                _ => klipper_reply(request),
            }
        });

        let manager = Arc::new(SessionManager::new(Arc::new(config), Arc::new(connector)));
        manager.connect("voron").await.unwrap();
        sent.lock().unwrap().clear();

        let pipeline = CommandPipeline::new(manager).with_command_timeout(Duration::from_secs(2));
        (pipeline, ConsoleContext::new(Some("voron".to_string())), sent)
    }

    fn scripts(sent: &Sent) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .filter(|(method, _)| method == METHOD_GCODE_SCRIPT)
            .filter_map(|(_, params)| params["script"].as_str().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_script_aborts_on_first_error() {
        let (mut pipeline, mut ctx, sent) = pipeline(false).await;

        let err = pipeline.run_script(&mut ctx, ["A", "B", "C"]).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ScriptAborted {
                line: 2,
                source: RpcError::ControllerError { code: 400, .. }
            }
        ));
        assert_eq!(scripts(&sent), vec!["A", "B"]);
        assert_eq!(pipeline.state(), PipelineState::Aborted);

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_script_continue_on_error() {
        let (mut pipeline, mut ctx, sent) = pipeline(true).await;

        let report = pipeline.run_script(&mut ctx, ["A", "B", "C"]).await.unwrap();
        assert_eq!(scripts(&sent), vec!["A", "B", "C"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].line, 2);
        assert_eq!(report.commands.len(), 3);
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_skipped_lines_keep_numbering() {
        let (mut pipeline, mut ctx, _sent) = pipeline(false).await;

        let script = "# warmup\n\nA\n; note\nB\nC\n";
        let err = pipeline
            .run_script_source(&mut ctx, script.as_bytes())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("line 5"));

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_comma_separated_line_stops_at_failure() {
        let (mut pipeline, mut ctx, sent) = pipeline(false).await;

        let outcome = pipeline.submit_line(&mut ctx, "A, B, C").await.unwrap();
        let Outcome::Firmware(reports) = outcome else {
            panic!("expected firmware outcome");
        };
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].result, Ok("ok".to_string()));
        assert!(reports[1].result.is_err());
        assert_eq!(scripts(&sent), vec!["A", "B"]);
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_m112_uses_emergency_path() {
        let (mut pipeline, mut ctx, sent) = pipeline(false).await;

        let outcome = pipeline.submit_line(&mut ctx, "m112").await.unwrap();
        assert!(matches!(outcome, Outcome::EmergencyStop(ref record) if record.printer == "voron"));

        tokio::time::timeout(Duration::from_secs(2), async {
            while sent.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let methods: Vec<String> = sent.lock().unwrap().iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(methods, vec!["printer.emergency_stop"]);

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_emergency_stop_requires_connection() {
        let (mut pipeline, mut ctx, _sent) = pipeline(false).await;
        pipeline.manager().disconnect("voron").await;

        let err = pipeline.submit_line(&mut ctx, ":estop").await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::EmergencyStop(EmergencyStopError::NotConnected("voron".to_string()))
        );
    }

    #[tokio::test]
    async fn test_builtins_touch_only_local_state() {
        let (mut pipeline, mut ctx, sent) = pipeline(false).await;

        let err = pipeline.submit_line(&mut ctx, ":printer prusa").await.unwrap_err();
        assert_eq!(err, PipelineError::UnknownPrinter("prusa".to_string()));
        assert_eq!(ctx.active(), Some("voron"));

        let err = pipeline.submit_line(&mut ctx, ":bogus").await.unwrap_err();
        assert_eq!(err, PipelineError::UnknownBuiltin(":bogus".to_string()));

        let outcome = pipeline.submit_line(&mut ctx, ":history G1").await.unwrap();
        assert_eq!(outcome, Outcome::SearchHistory(Some("G1".to_string())));
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_no_active_printer() {
        let (mut pipeline, _ctx, _sent) = pipeline(false).await;
        let mut ctx = ConsoleContext::default();

        let err = pipeline.submit_line(&mut ctx, "G28").await.unwrap_err();
        assert_eq!(err, PipelineError::NoActivePrinter);

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_jobs_builtin_fetches_history() {
        let (mut pipeline, mut ctx, sent) = pipeline(false).await;

        let outcome = pipeline.submit_line(&mut ctx, ":jobs").await.unwrap();
        assert!(matches!(outcome, Outcome::Jobs { ref printer, ref page } if printer == "voron" && page.jobs.len() == 1));
        let methods: Vec<String> = sent.lock().unwrap().iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(methods, vec!["server.history.list"]);

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_script_source_reads_chunked_input() {
        let (mut pipeline, mut ctx, sent) = pipeline(false).await;
        let source = tokio_test::io::Builder::new()
            .read(b"G28\n; pa")
            .read(b"rk\nM10")
            .read(b"5\n")
            .build();

        let report = pipeline
            .run_script_source(&mut ctx, tokio::io::BufReader::new(source))
            .await
            .unwrap();
        assert_eq!(report.lines, 3);
        assert_eq!(scripts(&sent), vec!["G28", "M105"]);

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_controls_send_gcode() {
        let (mut pipeline, mut ctx, sent) = pipeline(false).await;

        let outcome = pipeline.submit_line(&mut ctx, ":temp extruder 210").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Control {
                printer: "voron".to_string(),
                summary: "Extruder target set to 210°C".to_string(),
            }
        );
        pipeline.submit_line(&mut ctx, ":fan exhaust 35").await.unwrap();
        pipeline.submit_line(&mut ctx, ":move z 5").await.unwrap();
        assert_eq!(
            scripts(&sent),
            vec!["M104 S210", "SET_FAN_SPEED FAN=exhaust SPEED=0.35", "G0 Z5.00 F3000"]
        );

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_reprint_uses_shown_job_page() {
        let (mut pipeline, mut ctx, sent) = pipeline(false).await;

        let err = pipeline.submit_line(&mut ctx, ":reprint 1").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArguments(_)));

        pipeline.submit_line(&mut ctx, ":jobs").await.unwrap();
        let outcome = pipeline.submit_line(&mut ctx, ":reprint 1").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::PrintStarted {
                printer: "voron".to_string(),
                filename: "benchy.gcode".to_string(),
            }
        );
        assert!(sent
            .lock()
            .unwrap()
            .contains(&("printer.print.start".to_string(), json!({"filename": "benchy.gcode"}))));

        let err = pipeline.submit_line(&mut ctx, ":reprint 2").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArguments(_)));

        pipeline.manager().shutdown().await;
    }

    #[tokio::test]
    async fn test_power_builtins() {
        let (mut pipeline, mut ctx, _sent) = pipeline(false).await;

        let outcome = pipeline.submit_line(&mut ctx, ":power").await.unwrap();
        let Outcome::PowerDevices { devices, .. } = outcome else {
            panic!("expected power devices");
        };
        assert_eq!(devices.len(), 2);

        let outcome = pipeline.submit_line(&mut ctx, ":power lights on").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::PowerSwitched {
                printer: "voron".to_string(),
                device: "lights".to_string(),
                status: "on".to_string(),
            }
        );

        pipeline.manager().shutdown().await;
    }
}
