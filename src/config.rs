//! Configuration management for the Tapo exporter.
//!
//! Supports loading configuration from:
//! - TOML configuration files
//! - Environment variables (with `TAPO_EXPORTER_` prefix)
//! - Command-line arguments

use crate::error::{Result, TapoError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Device fleet and credential settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TapoConfig {
    /// Tapo account username
    #[serde(default)]
    pub username: String,

    /// Tapo account password
    #[serde(default)]
    pub password: String,

    /// Device addresses to poll (e.g., "192.168.1.20")
    #[serde(default)]
    pub devices: Vec<String>,

    /// Timeout for each call into a device, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Models that report energy usage
    #[serde(default = "default_power_models")]
    pub power_models: Vec<String>,
}

impl TapoConfig {
    /// Per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl std::fmt::Debug for TapoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapoConfig")
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("devices", &self.devices)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("power_models", &self.power_models)
            .finish()
    }
}

/// Exporter specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    /// Address to listen on for metrics endpoint
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Path under which metrics are exposed
    #[serde(default = "default_telemetry_path")]
    pub telemetry_path: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format ("text" or "json")
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Leave out build info and process_* metrics about the exporter itself
    #[serde(default)]
    pub disable_exporter_metrics: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            telemetry_path: default_telemetry_path(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            disable_exporter_metrics: false,
        }
    }
}

/// Main configuration structure for the Tapo exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Device configuration
    pub tapo: TapoConfig,

    /// Exporter server configuration
    #[serde(default)]
    pub exporter: ExporterConfig,
}

/// Values given on the command line, applied on top of file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen_address: Option<String>,
    pub devices: Vec<String>,
}

fn default_timeout() -> u64 {
    10
}

fn default_power_models() -> Vec<String> {
    vec!["P110".to_string()]
}

fn default_listen_address() -> String {
    "0.0.0.0:9782".to_string()
}

fn default_telemetry_path() -> String {
    "/metrics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Settings {
    /// Load configuration from a file and environment variables.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tapo_exporter::config::Settings;
    ///
    /// let settings = Settings::load(Some("config/default.toml")).unwrap();
    /// ```
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with_overrides(config_path, &CliOverrides::default())
    }

    /// Load configuration, letting command-line values win over file and environment.
    pub fn load_with_overrides(config_path: Option<&str>, cli: &CliOverrides) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        // TAPO_EXPORTER_TAPO__DEVICES="10.0.0.5,10.0.0.6"
        builder = builder.add_source(
            config::Environment::with_prefix("TAPO_EXPORTER")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("tapo.devices")
                .with_list_parse_key("tapo.power_models")
                .try_parsing(true),
        );

        if let Some(listen_address) = &cli.listen_address {
            builder = builder.set_override("exporter.listen_address", listen_address.as_str())?;
        }
        if !cli.devices.is_empty() {
            builder = builder.set_override("tapo.devices", cli.devices.clone())?;
        }

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings.
    fn validate(&self) -> Result<()> {
        if self.tapo.username.is_empty() || self.tapo.password.is_empty() {
            return Err(invalid("Tapo username and password are required"));
        }

        if self.tapo.devices.iter().all(|d| d.trim().is_empty()) {
            return Err(invalid("at least one device address is required"));
        }

        if self.tapo.timeout_seconds == 0 {
            return Err(invalid("timeout_seconds must be greater than zero"));
        }

        if !matches!(self.exporter.log_format.as_str(), "text" | "json") {
            return Err(invalid("log_format must be \"text\" or \"json\""));
        }

        let path = &self.exporter.telemetry_path;
        if !path.starts_with('/') || path == "/" || path == "/health" {
            return Err(invalid(
                "telemetry_path must start with '/' and not clash with '/' or '/health'",
            ));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> TapoError {
    TapoError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tapo: TapoConfig {
                username: String::new(),
                password: String::new(),
                devices: Vec::new(),
                timeout_seconds: default_timeout(),
                power_models: default_power_models(),
            },
            exporter: ExporterConfig::default(),
        }
    }
}
