use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Moonriver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoonriverConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Printer endpoints
    #[serde(default)]
    pub printers: Vec<PrinterConfig>,
}

/// Global console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file; the TUI owns stderr so logs go here when set
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Default request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Timeout for firmware commands, which may run for minutes (homing, heating)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Transport connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Command history capacity
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Command history file (defaults to ~/.moonriver_history.json)
    #[serde(default)]
    pub history_file: Option<PathBuf>,
    /// Keep executing scripts after a failed command
    #[serde(default)]
    pub continue_on_error: bool,
    /// Per-session notification channel capacity
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Exponential backoff settings for reconnecting sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of the delay used as jitter, 0.0..=1.0
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

/// One controller endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterConfig {
    /// Printer name used by `:printer <name>`
    pub name: String,
    /// WebSocket URL, e.g. ws://voron.local:7125/websocket
    pub url: String,
    /// Moonraker API key, if the instance requires one
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the global request timeout
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_command_timeout() -> u64 {
    600_000
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_history_limit() -> usize {
    1000
}

fn default_notification_buffer() -> usize {
    256
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            request_timeout_ms: default_request_timeout(),
            command_timeout_ms: default_command_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            history_limit: default_history_limit(),
            history_file: None,
            continue_on_error: false,
            notification_buffer: default_notification_buffer(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    /// Reject settings that cannot produce a delay
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("reconnect.multiplier must be a number >= 1.0, got {}", self.multiplier));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("reconnect.jitter must be between 0.0 and 1.0, got {}", self.jitter));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(format!(
                "reconnect.initial_delay_ms ({}) exceeds max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}

impl GlobalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl PrinterConfig {
    /// Build a printer entry from a host/port pair
    pub fn from_host(name: impl Into<String>, host: &str, port: u16) -> Self {
        Self {
            name: name.into(),
            url: format!("ws://{}:{}/websocket", host, port),
            api_key: None,
            request_timeout_ms: None,
        }
    }

    /// Request timeout for this printer
    pub fn request_timeout(&self, global: &GlobalConfig) -> Duration {
        self.request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| global.request_timeout())
    }
}

impl MoonriverConfig {
    /// Look up a printer by name
    pub fn printer(&self, name: &str) -> Option<&PrinterConfig> {
        self.printers.iter().find(|p| p.name == name)
    }

    /// Add `printer`, replacing any printer with the same name
    pub fn upsert_printer(&mut self, printer: PrinterConfig) {
        match self.printers.iter_mut().find(|existing| existing.name == printer.name) {
            Some(existing) => *existing = printer,
            None => self.printers.push(printer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_validation() {
        assert!(ReconnectConfig::default().validate().is_ok());

        let config: MoonriverConfig = toml::from_str("[global.reconnect]\njitter = nan\n").unwrap();
        assert!(config.global.reconnect.validate().unwrap_err().contains("jitter"));

        let config: MoonriverConfig = toml::from_str("[global.reconnect]\nmultiplier = inf\n").unwrap();
        assert!(config.global.reconnect.validate().unwrap_err().contains("multiplier"));

        let reconnect = ReconnectConfig {
            initial_delay_ms: 60_000,
            ..ReconnectConfig::default()
        };
        assert!(reconnect.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = MoonriverConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let _deserialized: MoonriverConfig = toml::from_str(&toml_str).unwrap();
    }

    #[test]
    fn test_printer_config() {
        let toml_str = r#"
            [global]
            continue_on_error = true
            history_limit = 50

            [[printers]]
            name = "voron"
            url = "ws://voron.local:7125/websocket"

            [[printers]]
            name = "ender"
            url = "ws://10.0.0.12:7125/websocket"
            request_timeout_ms = 2000
        "#;

        let config: MoonriverConfig = toml::from_str(toml_str).unwrap();
        assert!(config.global.continue_on_error);
        assert_eq!(config.global.history_limit, 50);
        assert_eq!(config.global.request_timeout_ms, 10_000);
        assert_eq!(config.printers.len(), 2);

        let ender = config.printer("ender").unwrap();
        assert_eq!(ender.request_timeout(&config.global), Duration::from_millis(2000));
        let voron = config.printer("voron").unwrap();
        assert_eq!(voron.request_timeout(&config.global), Duration::from_millis(10_000));
    }

    #[test]
    fn test_from_host() {
        let printer = PrinterConfig::from_host("local", "localhost", 7125);
        assert_eq!(printer.url, "ws://localhost:7125/websocket");
    }

    #[test]
    fn test_upsert_printer_replaces_by_name() {
        let mut config = MoonriverConfig::default();
        config.upsert_printer(PrinterConfig::from_host("voron", "voron.local", 7125));
        config.upsert_printer(PrinterConfig::from_host("ender", "ender.local", 7125));
        config.upsert_printer(PrinterConfig::from_host("voron", "10.0.0.5", 7125));

        assert_eq!(config.printers.len(), 2);
        assert_eq!(config.printers[0].url, "ws://10.0.0.5:7125/websocket");
    }

    #[test]
    fn test_reconnect_defaults() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.initial_delay_ms, 500);
        assert_eq!(reconnect.max_delay_ms, 30_000);
        assert!((reconnect.jitter - 0.25).abs() < f64::EPSILON);
    }
}
