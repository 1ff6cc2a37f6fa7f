use crate::cli::args::OutputFormat;
use crate::core::controls::PowerDevice;
use crate::core::jobs::{format_duration, JobPage, JobRecord};
use crate::core::pipeline::{CommandReport, ScriptReport};
use crate::core::session::{EmergencyStopRecord, SessionSummary};
use crate::domain::config::{MoonriverConfig, PrinterConfig};
use serde_json::json;
use std::io;
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_printers(&self, printers: &[PrinterConfig]) -> Result<(), OutputError>;
    fn write_sessions(&self, sessions: &[SessionSummary]) -> Result<(), OutputError>;
    fn write_config(&self, config: &MoonriverConfig) -> Result<(), OutputError>;
    fn write_command(&self, line: usize, report: &CommandReport) -> Result<(), OutputError>;
    fn write_script_summary(&self, report: &ScriptReport) -> Result<(), OutputError>;
    fn write_emergency_stop(&self, record: &EmergencyStopRecord) -> Result<(), OutputError>;
    fn write_jobs(&self, printer: &str, page: &JobPage) -> Result<(), OutputError>;
    fn write_power_devices(&self, printer: &str, devices: &[PowerDevice]) -> Result<(), OutputError>;
    fn write_history(&self, entries: &[&str]) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
}

impl From<OutputError> for crate::domain::error::MoonriverError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_printers(&self, printers: &[PrinterConfig]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                for printer in printers {
                    println!("{}: {}", printer.name, printer.url);
                }
            }
            OutputFormat::Json => {
                let rows: Vec<_> = printers
                    .iter()
                    .map(|p| json!({ "name": p.name, "url": p.url, "api_key": p.api_key.is_some() }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            OutputFormat::Table => {
                if !printers.is_empty() {
                    let table_data: Vec<PrinterTableRow> = printers.iter().map(PrinterTableRow::from).collect();
                    println!("{}", Table::new(table_data));
                }
            }
        }
        Ok(())
    }

    fn write_sessions(&self, sessions: &[SessionSummary]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                for session in sessions {
                    println!("Printer: {}", session.name);
                    println!("  Endpoint: {}", session.endpoint);
                    println!("  State: {}", session.state);
                    println!("  Objects: {}", session.subscribed_objects);
                    println!("  Macros: {}", session.macros);
                    println!();
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(sessions)?);
            }
            OutputFormat::Table => {
                if !sessions.is_empty() {
                    let table_data: Vec<SessionTableRow> = sessions.iter().map(SessionTableRow::from).collect();
                    println!("{}", Table::new(table_data));
                }
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &MoonriverConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
            OutputFormat::Text | OutputFormat::Table => {
                print!("{}", toml::to_string_pretty(config)?);
            }
        }
        Ok(())
    }

    fn write_command(&self, line: usize, report: &CommandReport) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = match &report.result {
                    Ok(response) => json!({
                        "line": line,
                        "printer": report.printer,
                        "command": report.command,
                        "response": response,
                    }),
                    Err(e) => json!({
                        "line": line,
                        "printer": report.printer,
                        "command": report.command,
                        "error": e.to_string(),
                    }),
                };
                println!("{}", serde_json::to_string(&output)?);
            }
            _ => match &report.result {
                Ok(response) if response.is_empty() || response == "ok" => {
                    println!("{} > {}", report.printer, report.command);
                }
                Ok(response) => {
                    println!("{} > {}", report.printer, report.command);
                    for text in response.lines() {
                        println!("  {}", text);
                    }
                }
                Err(e) => eprintln!("{} > {}: {}", report.printer, report.command, e),
            },
        }
        Ok(())
    }

    fn write_script_summary(&self, report: &ScriptReport) -> Result<(), OutputError> {
        let failures: Vec<_> = report
            .failures
            .iter()
            .map(|f| json!({ "line": f.line, "error": f.error.to_string() }))
            .collect();
        match self.format {
            OutputFormat::Json => {
                let output = json!({
                    "lines": report.lines,
                    "commands": report.commands.len(),
                    "failures": failures,
                    "emergency_stops": report.emergency_stops.len(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                println!(
                    "{} lines, {} commands, {} failed",
                    report.lines,
                    report.commands.len(),
                    report.failures.len()
                );
                for failure in &report.failures {
                    eprintln!("  line {}: {}", failure.line, failure.error);
                }
            }
        }
        Ok(())
    }

    fn write_emergency_stop(&self, record: &EmergencyStopRecord) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(record)?);
            }
            _ => {
                println!(
                    "Emergency stop sent to '{}' (request {}, written in {:.1}ms)",
                    record.printer,
                    record.request_id,
                    record.write_latency.as_secs_f64() * 1000.0
                );
            }
        }
        Ok(())
    }

    fn write_jobs(&self, printer: &str, page: &JobPage) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("Jobs on '{}' ({} total):", printer, page.total);
                for (row, job) in page.jobs.iter().enumerate() {
                    println!(
                        "  {:>3} {:<10} {:<12} {:>9}  {}",
                        row + 1,
                        job.job_id,
                        job.status,
                        format_duration(job.print_duration),
                        job.filename
                    );
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(page)?);
            }
            OutputFormat::Table => {
                let table_data: Vec<JobTableRow> = page.jobs.iter().map(JobTableRow::from).collect();
                println!("{}", Table::new(table_data));
            }
        }
        Ok(())
    }

    fn write_power_devices(&self, printer: &str, devices: &[PowerDevice]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("Power devices on '{}':", printer);
                for device in devices {
                    println!(
                        "  {:<16} {:<5} {:<16} {}",
                        device.device,
                        device.status,
                        device.kind,
                        if device.locked_while_printing { "locked while printing" } else { "" }
                    );
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(devices)?);
            }
            OutputFormat::Table => {
                let table_data: Vec<PowerTableRow> = devices.iter().map(PowerTableRow::from).collect();
                println!("{}", Table::new(table_data));
            }
        }
        Ok(())
    }

    fn write_history(&self, entries: &[&str]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(entries)?);
            }
            OutputFormat::Text => {
                for entry in entries {
                    println!("{}", entry);
                }
            }
            OutputFormat::Table => {
                let table_data: Vec<HistoryTableRow> = entries
                    .iter()
                    .enumerate()
                    .map(|(age, command)| HistoryTableRow {
                        age,
                        command: command.to_string(),
                    })
                    .collect();
                println!("{}", Table::new(table_data));
            }
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                println!("{}", message);
            }
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}

/// Table row for configured printers
#[derive(Tabled)]
struct PrinterTableRow {
    name: String,
    url: String,
    api_key: String,
}

impl From<&PrinterConfig> for PrinterTableRow {
    fn from(printer: &PrinterConfig) -> Self {
        Self {
            name: printer.name.clone(),
            url: printer.url.clone(),
            api_key: if printer.api_key.is_some() { "yes" } else { "no" }.to_string(),
        }
    }
}

/// Table row for session summary
#[derive(Tabled)]
struct SessionTableRow {
    printer: String,
    endpoint: String,
    state: String,
    pending: usize,
    objects: usize,
    macros: usize,
    reconnects: u64,
}

impl From<&SessionSummary> for SessionTableRow {
    fn from(session: &SessionSummary) -> Self {
        Self {
            printer: session.name.clone(),
            endpoint: session.endpoint.clone(),
            state: session.state.to_string(),
            pending: session.pending_requests,
            objects: session.subscribed_objects,
            macros: session.macros,
            reconnects: session.reconnects,
        }
    }
}

/// Table row for a print job
#[derive(Tabled)]
struct JobTableRow {
    id: String,
    status: String,
    duration: String,
    filament: String,
    file: String,
}

impl From<&JobRecord> for JobTableRow {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.job_id.clone(),
            status: job.status.clone(),
            duration: format_duration(job.print_duration),
            filament: format!("{:.2}m", job.filament_used / 1000.0),
            file: job.filename.clone(),
        }
    }
}

#[derive(Tabled)]
struct HistoryTableRow {
    age: usize,
    command: String,
}

#[derive(Tabled)]
struct PowerTableRow {
    device: String,
    status: String,
    kind: String,
    locked: String,
}

impl From<&PowerDevice> for PowerTableRow {
    fn from(device: &PowerDevice) -> Self {
        Self {
            device: device.device.clone(),
            status: device.status.clone(),
            kind: device.kind.clone(),
            locked: if device.locked_while_printing { "yes" } else { "no" }.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_row_units() {
        let job = JobRecord {
            job_id: "000012".to_string(),
            filename: "benchy.gcode".to_string(),
            status: "completed".to_string(),
            start_time: None,
            end_time: None,
            print_duration: 1800.0,
            total_duration: 1900.0,
            filament_used: 2500.0,
        };
        let row = JobTableRow::from(&job);
        assert_eq!(row.duration, "0:30:00");
        assert_eq!(row.filament, "2.50m");
    }

    #[test]
    fn test_power_row_marks_lock() {
        let device = PowerDevice {
            device: "printer".to_string(),
            status: "on".to_string(),
            kind: "gpio".to_string(),
            locked_while_printing: true,
        };
        let row = PowerTableRow::from(&device);
        assert_eq!(row.locked, "yes");
        assert_eq!(row.kind, "gpio");
    }
}
