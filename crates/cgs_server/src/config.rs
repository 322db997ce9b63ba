//! Server configuration loaded from a YAML file, with CLI overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::CliArgs;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub plugins: PluginSettings,
    pub health: HealthSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server instance name, used in logs and metrics labels.
    pub name: String,
    /// Simulation rate in Hz.
    pub tick_rate_hz: u32,
    /// Upper bound on concurrent sessions.
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Directory scanned for dynamic plugin libraries.
    pub directory: PathBuf,
    /// Load every library found in the directory at startup.
    pub auto_load: bool,
    /// Watch dynamic plugin libraries and reload them on change.
    pub hot_reload: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub enabled: bool,
    /// Bind address for the health and metrics HTTP endpoint.
    pub bind_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "cgs".to_string(),
            tick_rate_hz: 20,
            max_sessions: 1000,
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("plugins"),
            auto_load: true,
            hot_reload: false,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:9100".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            plugins: PluginSettings::default(),
            health: HealthSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a YAML file. A missing file is replaced
    /// with a freshly written default config.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let yaml = serde_yaml::to_string(&default_config)?;
            tokio::fs::write(path, yaml).await?;
            info!(path = %path.display(), "created default configuration file");
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of file values.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(dir) = &args.plugin_dir {
            self.plugins.directory = dir.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(hz) = args.tick_rate {
            self.server.tick_rate_hz = hz;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.name.is_empty() {
            return Err("server name cannot be empty".to_string());
        }
        if self.server.tick_rate_hz == 0 || self.server.tick_rate_hz > 1000 {
            return Err(format!(
                "tick rate must be between 1 and 1000 Hz, got {}",
                self.server.tick_rate_hz
            ));
        }
        if self.server.max_sessions == 0 {
            return Err("max_sessions must be positive".to_string());
        }
        if self.plugins.directory.as_os_str().is_empty() {
            return Err("plugin directory cannot be empty".to_string());
        }
        if self.plugins.hot_reload && !self.plugins.auto_load {
            return Err("hot_reload requires auto_load".to_string());
        }
        if self.health.enabled
            && self
                .health
                .bind_address
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(format!(
                "invalid health bind address: {}",
                self.health.bind_address
            ));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            ));
        }
        Ok(())
    }
}
