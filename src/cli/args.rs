use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line arguments for Moonriver
#[derive(Parser, Debug)]
#[command(
    name = "moonriver",
    version = env!("CARGO_PKG_VERSION"),
    about = "Terminal console for Klipper printers",
    long_about = "An interactive console for one or more Klipper printers over the Moonraker WebSocket API, with scripting, job history and an emergency stop that bypasses queued commands."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Printer to use, or NAME=URL to add one; repeatable, the first is active
    #[arg(short, long = "printer", value_name = "NAME[=URL]", value_parser = parse_printer_arg, global = true)]
    pub printers: Vec<PrinterArg>,

    /// Moonraker host for an ad hoc printer
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Moonraker port for --host
    #[arg(long, default_value_t = 7125, global = true)]
    pub port: u16,

    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Command to execute; the interactive console when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive TUI mode
    Tui,
    /// Run firmware commands from a file or the command line
    Run(RunArgs),
    /// Send an emergency stop to the active printer
    Estop,
    /// Show the job history of the active printer
    Jobs {
        /// Jobs per page
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Page to show, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// List configured printers and their connection state
    Printers {
        /// Connect to each printer to report its state
        #[arg(long)]
        check: bool,
    },
    /// Command history commands
    History(HistoryArgs),
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Script arguments
#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    /// Script file; one command per line, `#` and `;` lines are skipped
    #[arg(short, long, conflicts_with = "commands")]
    pub file: Option<PathBuf>,

    /// Keep going after a command fails
    #[arg(long)]
    pub continue_on_error: bool,

    /// Commands to run, separated by commas (e.g. `G28, M105`)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub commands: Vec<String>,
}

/// Command history arguments
#[derive(ClapArgs, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub command: HistoryCommand,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// Show recent commands, newest first
    List {
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
    /// Show commands containing QUERY, newest first
    Search { query: String },
    /// Forget all history
    Clear,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the merged configuration
    Show,
    /// Create a project configuration in the given directory
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Show where configuration files are read from
    Path,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// A `--printer` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterArg {
    pub name: String,
    pub url: Option<String>,
}

fn parse_printer_arg(value: &str) -> Result<PrinterArg, String> {
    let (name, url) = match value.split_once('=') {
        Some((name, url)) => (name.trim(), Some(url.trim())),
        None => (value.trim(), None),
    };
    if name.is_empty() {
        return Err("printer name must not be empty".to_string());
    }
    if url.is_some_and(str::is_empty) {
        return Err(format!("missing URL for printer '{}'", name));
    }
    Ok(PrinterArg {
        name: name.to_string(),
        url: url.map(str::to_string),
    })
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Text
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}
