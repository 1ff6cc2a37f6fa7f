//! Classification of operator input.
//!
//! A line is either a console built-in (prefixed with `:`) or one or more
//! firmware commands separated by commas. Firmware text is forwarded as
//! written, minus `;` comments.

use crate::core::controls::{Control, PowerAction, PowerCommand};
use crate::domain::error::PipelineError;

/// Console commands that are not forwarded as written
#[derive(Debug, Clone, PartialEq)]
pub enum Builtin {
    /// Change which printer firmware commands go to
    Printer(String),
    Printers,
    Jobs(JobsAction),
    History(Option<String>),
    /// Emergency stop; `None` targets the active printer
    Estop(Option<String>),
    Connect(String),
    Disconnect(Option<String>),
    Control(Control),
    /// Start printing a file on the active printer
    Print(String),
    /// Print the job at this 1-based row of the last job page again
    Reprint(usize),
    Power(PowerCommand),
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobsAction {
    /// Show the current page, fetching the first if none was shown yet
    Show,
    Next,
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Empty,
    Comment,
    Builtin(Builtin),
    /// M112 anywhere on the line
    EmergencyStop,
    /// Firmware commands in submission order
    Firmware(Vec<String>),
}

/// Built-in names and their help text
pub const BUILTIN_HELP: &[(&str, &str)] = &[
    (":printer <name>", "Send firmware commands to <name>"),
    (":printers", "List printers and their connection state"),
    (":connect <name>", "Connect to a configured printer"),
    (":disconnect [name]", "Close a printer session"),
    (":jobs [next|reset]", "Browse the job history"),
    (":history [text]", "Search command history"),
    (":estop [name]", "Emergency stop (also M112 or Ctrl+X)"),
    (":temp <heater> <C>", "Set a heater target (extruder, bed or a heater name)"),
    (":fan <fan> <percent>", "Set a fan speed (part or a fan name)"),
    (":move <x|y|z> <mm>", "Move one axis to an absolute position"),
    (":print <file>", "Start printing a file"),
    (":reprint <n>", "Print job <n> of the shown job page again"),
    (":power [device [on|off]]", "List power devices, or switch one"),
    (":help", "Show this help"),
    (":quit", "Leave the console"),
];

pub fn parse_line(raw: &str) -> Result<Input, PipelineError> {
    let line = raw.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    if line.starts_with('#') || line.starts_with(';') {
        return Ok(Input::Comment);
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Ok(Input::Builtin(Builtin::Quit));
    }
    if line.starts_with(':') {
        return parse_builtin(line).map(Input::Builtin);
    }

    let commands = split_commands(line);
    if commands.is_empty() {
        return Ok(Input::Comment);
    }
    if commands.iter().any(|command| is_emergency_stop(command)) {
        return Ok(Input::EmergencyStop);
    }
    Ok(Input::Firmware(commands))
}

/// True if `line` holds an M112 in any of its commands
pub fn contains_emergency_stop(line: &str) -> bool {
    let line = line.trim();
    !line.starts_with(':') && split_commands(line).iter().any(|c| is_emergency_stop(c))
}

fn is_emergency_stop(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("M112"))
}

fn split_commands(line: &str) -> Vec<String> {
    let code = match line.find(';') {
        Some(comment) => &line[..comment],
        None => line,
    };
    code.split(',')
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_builtin(line: &str) -> Result<Builtin, PipelineError> {
    let mut words = line.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let builtin = match (name, args.as_slice()) {
        (":printer", [printer]) => Builtin::Printer(printer.to_string()),
        (":printer", _) => return Err(usage(":printer <name>")),
        (":printers", []) => Builtin::Printers,
        (":connect", [printer]) => Builtin::Connect(printer.to_string()),
        (":connect", _) => return Err(usage(":connect <name>")),
        (":disconnect", []) => Builtin::Disconnect(None),
        (":disconnect", [printer]) => Builtin::Disconnect(Some(printer.to_string())),
        (":jobs", []) => Builtin::Jobs(JobsAction::Show),
        (":jobs", ["next"]) => Builtin::Jobs(JobsAction::Next),
        (":jobs", ["reset"]) => Builtin::Jobs(JobsAction::Reset),
        (":jobs", _) => return Err(usage(":jobs [next|reset]")),
        (":history", []) => Builtin::History(None),
        (":history", query) => Builtin::History(Some(query.join(" "))),
        (":estop", []) => Builtin::Estop(None),
        (":estop", [printer]) => Builtin::Estop(Some(printer.to_string())),
        (":temp", [heater, target]) => Builtin::Control(Control::heater(heater, target)?),
        (":temp", _) => return Err(usage(":temp <heater> <C>")),
        (":fan", [fan, percent]) => Builtin::Control(Control::fan(fan, percent)?),
        (":fan", _) => return Err(usage(":fan <fan> <percent>")),
        (":move", [axis, position]) => Builtin::Control(Control::move_axis(axis, position)?),
        (":move", _) => return Err(usage(":move <x|y|z> <mm>")),
        (":print", [filename]) => Builtin::Print(filename.to_string()),
        (":print", _) => return Err(usage(":print <file>")),
        (":reprint", [row]) => match row.parse::<usize>() {
            Ok(row) if row > 0 => Builtin::Reprint(row),
            _ => return Err(usage(":reprint <n>, n counting from 1")),
        },
        (":reprint", _) => return Err(usage(":reprint <n>")),
        (":power", []) => Builtin::Power(PowerCommand::List),
        (":power", [device]) => Builtin::Power(PowerCommand::Set {
            device: device.to_string(),
            action: PowerAction::Toggle,
        }),
        (":power", [device, action]) => match PowerAction::from_word(action) {
            Some(action) => Builtin::Power(PowerCommand::Set {
                device: device.to_string(),
                action,
            }),
            None => return Err(usage(":power [device [on|off|toggle]]")),
        },
        (":power", _) => return Err(usage(":power [device [on|off|toggle]]")),
        (":help", _) => Builtin::Help,
        (":quit", []) => Builtin::Quit,
        (":printers" | ":estop" | ":disconnect" | ":quit", _) => {
            return Err(PipelineError::InvalidArguments(format!(
                "{} takes at most the arguments shown in :help",
                name
            )))
        }
        _ => return Err(PipelineError::UnknownBuiltin(name.to_string())),
    };
    Ok(builtin)
}

fn usage(text: &str) -> PipelineError {
    PipelineError::InvalidArguments(format!("usage: {}", text))
}
