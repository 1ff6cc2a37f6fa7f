use crate::cli::args::{Args, Command, ConfigCommand, HistoryCommand, RunArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::core::jobs::{JobHistoryBrowser, PageToken};
use crate::core::pipeline::{CommandPipeline, ConsoleContext, Outcome, BUILTIN_HELP};
use crate::core::session::SessionManager;
use crate::domain::config::{MoonriverConfig, PrinterConfig};
use crate::domain::error::{ConnectError, MoonriverError, MoonriverResult, PipelineError};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::history_store::{history_path, load_history, save_history};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::websocket::WebSocketConnector;
use std::sync::Arc;
use tracing::{info, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> MoonriverResult<()> {
    let writer = ConsoleWriter::new(args.output);

    let config_manager = ConfigManager::new()?;
    let config = build_config(&args, &config_manager)?;
    let active = active_printer(&args, &config);

    let interactive = matches!(args.command, None | Some(Command::Tui));
    setup_logging(&args, &config, interactive)?;

    match args.command.unwrap_or(Command::Tui) {
        Command::Tui => crate::tui::app::run(config, active).await,
        Command::Run(run) => execute_run_command(run, &writer, config, active).await,
        Command::Estop => {
            let manager = connect(config, active.as_deref()).await?;
            let printer = active.unwrap_or_default();
            let result = manager.emergency_stop(&printer).await;
            manager.shutdown().await;
            writer.write_emergency_stop(&result?)?;
            Ok(())
        }
        Command::Jobs { limit, page } => {
            let manager = connect(config, active.as_deref()).await?;
            let result = list_jobs(&manager, active.as_deref().unwrap_or_default(), limit, page).await;
            manager.shutdown().await;
            let (printer, page) = result?;
            writer.write_jobs(&printer, &page)?;
            Ok(())
        }
        Command::Printers { check } => {
            if !check {
                writer.write_printers(&config.printers)?;
                return Ok(());
            }
            let manager = SessionManager::new(Arc::new(config), Arc::new(WebSocketConnector));
            for (printer, result) in manager.connect_all().await {
                if let Err(e) = result {
                    writer.write_error(&format!("{}: {}", printer, e))?;
                }
            }
            writer.write_sessions(&manager.summaries().await)?;
            manager.shutdown().await;
            Ok(())
        }
        Command::History(history_args) => execute_history_command(history_args.command, &writer, &config),
        Command::Config(config_args) => match config_args.command {
            ConfigCommand::Show => {
                writer.write_config(&config)?;
                Ok(())
            }
            ConfigCommand::Init { path } => {
                let created = config_manager.init_project_config(&path)?;
                writer.write_message(&format!("Project configuration initialized at '{}'", created.display()))?;
                Ok(())
            }
            ConfigCommand::Path => {
                writer.write_message(&format!(
                    "User configuration: {}",
                    config_manager.get_global_config_path_ref().display()
                ))?;
                match config_manager.get_project_config_path() {
                    Some(path) => writer.write_message(&format!("Project configuration: {}", path.display()))?,
                    None => writer.write_message("Project configuration: none")?,
                }
                Ok(())
            }
        },
        Command::Version => {
            writer.write_message(&format!("moonriver {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

/// Load configuration files and apply command line overrides
fn build_config(args: &Args, config_manager: &ConfigManager) -> MoonriverResult<MoonriverConfig> {
    let mut config = match &args.config {
        Some(path) => config_manager.load_config_from_path(path)?,
        None => config_manager.load_config()?,
    };

    if let Some(timeout) = args.timeout {
        config.global.request_timeout_ms = timeout;
    }
    if let Some(log_file) = &args.log_file {
        config.global.log_file = Some(log_file.clone());
    }
    if let Some(host) = &args.host {
        config.upsert_printer(PrinterConfig::from_host(host.clone(), host, args.port));
    }
    for printer in &args.printers {
        match &printer.url {
            Some(url) => config.upsert_printer(PrinterConfig {
                name: printer.name.clone(),
                url: url.clone(),
                api_key: None,
                request_timeout_ms: None,
            }),
            None if config.printer(&printer.name).is_none() => {
                return Err(ConnectError::UnknownPrinter(printer.name.clone()).into());
            }
            None => {}
        }
    }
    Ok(config)
}

/// First `--printer`, else `--host`, else the first configured printer
fn active_printer(args: &Args, config: &MoonriverConfig) -> Option<String> {
    args.printers
        .first()
        .map(|printer| printer.name.clone())
        .or_else(|| args.host.clone())
        .or_else(|| config.printers.first().map(|printer| printer.name.clone()))
}

fn setup_logging(args: &Args, config: &MoonriverConfig, interactive: bool) -> MoonriverResult<()> {
    let log_file = config.global.log_file.as_deref();
    // The TUI owns the terminal; without a log file it runs silent.
    if (interactive && log_file.is_none()) || (args.quiet && log_file.is_none()) {
        return Ok(());
    }
    let level = if args.verbose {
        "debug"
    } else {
        config.global.log_level.as_str()
    };
    init_logging(Some(level), log_file)?;
    Ok(())
}

/// A manager with `printer` connected
async fn connect(config: MoonriverConfig, printer: Option<&str>) -> MoonriverResult<SessionManager> {
    let printer = printer.ok_or(PipelineError::NoActivePrinter)?;
    let manager = SessionManager::new(Arc::new(config), Arc::new(WebSocketConnector));
    manager.connect(printer).await?;
    Ok(manager)
}

async fn list_jobs(
    manager: &SessionManager,
    printer: &str,
    limit: usize,
    page: usize,
) -> MoonriverResult<(String, crate::core::jobs::JobPage)> {
    let session = manager
        .get(printer)
        .await
        .ok_or_else(|| ConnectError::UnknownPrinter(printer.to_string()))?;
    let mut browser = JobHistoryBrowser::new(session, limit.max(1));

    let mut listed = browser.list(PageToken::first()).await?;
    for _ in 1..page.max(1) {
        match listed.next {
            Some(token) => listed = browser.list(token).await?,
            None => break,
        }
    }
    Ok((printer.to_string(), listed))
}

async fn execute_run_command(
    run: RunArgs,
    writer: &ConsoleWriter,
    config: MoonriverConfig,
    active: Option<String>,
) -> MoonriverResult<()> {
    let script: Vec<String> = match &run.file {
        Some(path) => tokio::fs::read_to_string(path).await?.lines().map(str::to_string).collect(),
        None if run.commands.is_empty() => {
            return Err(PipelineError::InvalidArguments("nothing to run; pass commands or --file".to_string()).into());
        }
        None => vec![run.commands.join(" ")],
    };

    let continue_on_error = run.continue_on_error || config.global.continue_on_error;
    let manager = Arc::new(connect(config, active.as_deref()).await?);
    let mut pipeline = CommandPipeline::new(Arc::clone(&manager)).with_continue_on_error(continue_on_error);
    let mut ctx = ConsoleContext::new(active);

    info!("Running {} script lines", script.len());
    let result = pipeline
        .run_script_observed(&mut ctx, &script, |line, outcome| {
            if let Err(e) = write_outcome(writer, line, outcome) {
                warn!("Could not write output for line {}: {}", line, e);
            }
        })
        .await;
    manager.shutdown().await;

    let report = result?;
    if run.file.is_some() || !report.failures.is_empty() {
        writer.write_script_summary(&report)?;
    }
    Ok(())
}

fn write_outcome(writer: &ConsoleWriter, line: usize, outcome: &Outcome) -> MoonriverResult<()> {
    match outcome {
        Outcome::Firmware(reports) => {
            for report in reports {
                writer.write_command(line, report)?;
            }
        }
        Outcome::EmergencyStop(record) => writer.write_emergency_stop(record)?,
        Outcome::Jobs { printer, page } => writer.write_jobs(printer, page)?,
        Outcome::Printers(sessions) => writer.write_sessions(sessions)?,
        Outcome::Switched { printer, .. } => writer.write_message(&format!("Active printer: {}", printer))?,
        Outcome::Connected(printer) => writer.write_message(&format!("Connected to '{}'", printer))?,
        Outcome::Disconnected { printer, existed } => {
            if *existed {
                writer.write_message(&format!("Disconnected from '{}'", printer))?;
            }
        }
        Outcome::Control { printer, summary } => writer.write_message(&format!("{}: {}", printer, summary))?,
        Outcome::PrintStarted { printer, filename } => {
            writer.write_message(&format!("{}: started printing {}", printer, filename))?
        }
        Outcome::PowerDevices { printer, devices } => writer.write_power_devices(printer, devices)?,
        Outcome::PowerSwitched { printer, device, status } => {
            writer.write_message(&format!("{}: power device {} is {}", printer, device, status))?
        }
        Outcome::Help => {
            for (usage, text) in BUILTIN_HELP {
                writer.write_message(&format!("{:<26} {}", usage, text))?;
            }
        }
        Outcome::SearchHistory(_) | Outcome::Nothing | Outcome::Quit => {}
    }
    Ok(())
}

fn execute_history_command(
    command: HistoryCommand,
    writer: &ConsoleWriter,
    config: &MoonriverConfig,
) -> MoonriverResult<()> {
    let path = history_path(&config.global).ok_or_else(|| MoonriverError::Config {
        message: "Could not determine the history file location".to_string(),
    })?;
    let mut history = load_history(&path, config.global.history_limit);

    match command {
        HistoryCommand::List { limit } => {
            let entries: Vec<&str> = (0..limit).map_while(|age| history.recent(age)).collect();
            writer.write_history(&entries)?;
        }
        HistoryCommand::Search { query } => {
            let entries: Vec<&str> = history.search(&query).collect();
            writer.write_history(&entries)?;
        }
        HistoryCommand::Clear => {
            let cleared = history.len();
            history.clear();
            save_history(&path, &history)?;
            writer.write_message(&format!("Cleared {} history entries", cleared))?;
        }
    }
    Ok(())
}
