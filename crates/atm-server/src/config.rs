//! Server configuration loading from file and environment variables.

use atm_db::{AllocationPolicy, DbRuntimeSettings};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database and connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Upper bound on open connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// How long a borrower waits for a connection, in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// `"block"` waits for a free connection, `"fail"` errors immediately.
    #[serde(default)]
    pub allocation: AllocationPolicy,

    /// How long shutdown waits for borrowed connections to come back.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl DatabaseConfig {
    /// Pool settings derived from this section.
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
            acquire_timeout_ms: self.acquire_timeout_ms,
            allocation: self.allocation,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "atm_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "atm.db".to_string()
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_acquire_timeout_ms() -> u64 {
    DbRuntimeSettings::default().acquire_timeout_ms
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_max_size: default_pool_max_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            allocation: AllocationPolicy::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but holds values that cannot work.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ATM_HOST` overrides `server.host`
/// - `ATM_PORT` overrides `server.port`
/// - `ATM_DB_PATH` overrides `database.path`
/// - `ATM_DB_POOL_MAX_SIZE` overrides `database.pool_max_size`
/// - `ATM_LOG_LEVEL` overrides `logging.level`
/// - `ATM_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the final pool settings are unusable.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Parses a TOML document into a [`Config`].
///
/// # Errors
///
/// `ConfigError::Parse` for malformed TOML, `ConfigError::Invalid` for a zero
/// pool size or acquire timeout.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    config
        .database
        .runtime_settings()
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("ATM_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("ATM_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("ATM_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(max_size) = var("ATM_DB_POOL_MAX_SIZE") {
        match max_size.parse::<u32>() {
            Ok(parsed) if parsed > 0 => config.database.pool_max_size = parsed,
            _ => tracing::warn!(value = %max_size, "ignoring invalid ATM_DB_POOL_MAX_SIZE"),
        }
    }
    if let Some(level) = var("ATM_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("ATM_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
