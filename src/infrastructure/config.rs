use crate::domain::{
    config::{GlobalConfig, MoonriverConfig, PrinterConfig},
    error::{MoonriverError, MoonriverResult},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_DIR: &str = ".moonriver";
const CONFIG_FILE: &str = "config.toml";

/// Locates, loads and writes configuration files
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// User config under `~/.config/moonriver`, plus the nearest project
    /// config found walking up from the current directory
    pub fn new() -> MoonriverResult<Self> {
        let global_config_path = Self::get_global_config_path()?;
        let project_config_path = std::env::current_dir()
            .ok()
            .and_then(|cwd| Self::find_project_config_path(&cwd));

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load and merge configuration.
    ///
    /// Global settings come from the user file; printers from both files,
    /// user printers first. A project printer with the same name as a user
    /// printer replaces it.
    pub fn load_config(&self) -> MoonriverResult<MoonriverConfig> {
        let mut config = MoonriverConfig::default();

        if self.global_config_path.exists() {
            let global_config = self.load_config_from_path(&self.global_config_path)?;
            config.global = global_config.global;
            config.printers = global_config.printers;
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                let project_config = self.load_config_from_path(project_path)?;
                for printer in project_config.printers {
                    config.upsert_printer(printer);
                }
            }
        }

        debug!(
            "Loaded configuration with {} printers",
            config.printers.len()
        );
        Ok(config)
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> MoonriverResult<MoonriverConfig> {
        let content = fs::read_to_string(path).map_err(|e| MoonriverError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        let config: MoonriverConfig = toml::from_str(&content).map_err(|e| MoonriverError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })?;
        config.global.reconnect.validate().map_err(|reason| MoonriverError::Config {
            message: format!("Invalid config file {}: {}", path.display(), reason),
        })?;
        Ok(config)
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &MoonriverConfig) -> MoonriverResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MoonriverError::Config {
                message: format!("Failed to create config directory {}: {}", parent.display(), e),
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| MoonriverError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| MoonriverError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Write a starter project configuration under `path/.moonriver`
    pub fn init_project_config(&self, path: &Path) -> MoonriverResult<PathBuf> {
        let config_file = path.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_file.exists() {
            return Err(MoonriverError::Config {
                message: format!("Project configuration already exists at {}", config_file.display()),
            });
        }

        let default_config = MoonriverConfig {
            global: GlobalConfig::default(),
            printers: vec![PrinterConfig::from_host("printer", "localhost", 7125)],
        };
        self.save_config_to_path(&config_file, &default_config)?;
        Ok(config_file)
    }

    pub fn get_project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    pub fn get_global_config_path_ref(&self) -> &PathBuf {
        &self.global_config_path
    }

    fn get_global_config_path() -> MoonriverResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| MoonriverError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join("moonriver").join(CONFIG_FILE))
    }

    /// Nearest `.moonriver/config.toml` at or above `start`
    fn find_project_config_path(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
            .find(|candidate| candidate.exists())
    }
}
