//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pagebeam/config.toml`, then
//! overridden by `PAGEBEAM_*` environment variables.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pagebeam/` (~/.config/pagebeam/)
//! - State/Logs: `$XDG_STATE_HOME/pagebeam/` (~/.local/state/pagebeam/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Collection endpoint used when neither the config file nor
/// `PAGEBEAM_ENDPOINT` supplies one.
pub const DEFAULT_ENDPOINT: &str = "https://collect.pagebeam.io/v1/events";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Tracking pipeline configuration
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution environment for the delivery gate.
///
/// Outside `Production`, deliveries are logged and suppressed unless
/// `force_send` is set, so development traffic never reaches the real
/// collection endpoint.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(format!("unknown environment: {}", s)),
        }
    }
}

/// Tracking pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Collection endpoint URL; falls back to [`DEFAULT_ENDPOINT`]
    pub endpoint: Option<String>,

    /// Bearer token for the collection endpoint (optional)
    pub api_key: Option<String>,

    /// Execution environment (default: development)
    #[serde(default)]
    pub environment: Environment,

    /// Deliver events even outside production
    #[serde(default)]
    pub force_send: bool,

    /// Events buffered before an immediate flush (default 10, max 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max milliseconds before flushing an incomplete batch
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Delivery attempts for the immediate-send path
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base delay between retry attempts (linear backoff)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Delay after a navigation before the page_view event is built,
    /// letting the page title settle
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            environment: Environment::default(),
            force_send: false,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl TrackerConfig {
    /// Resolve the collection endpoint, falling back to the default URL.
    pub fn resolved_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    /// Flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Retry base delay as a [`Duration`].
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Apply `PAGEBEAM_*` environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("PAGEBEAM_ENDPOINT") {
            if !endpoint.is_empty() {
                self.endpoint = Some(endpoint);
            }
        }
        if let Ok(api_key) = std::env::var("PAGEBEAM_API_KEY") {
            if !api_key.is_empty() {
                self.api_key = Some(api_key);
            }
        }
        if let Ok(env) = std::env::var("PAGEBEAM_ENV") {
            match env.parse() {
                Ok(parsed) => self.environment = parsed,
                Err(e) => tracing::warn!(error = %e, "Ignoring invalid PAGEBEAM_ENV"),
            }
        }
        if let Ok(force) = std::env::var("PAGEBEAM_FORCE_SEND") {
            self.force_send = matches!(force.as_str(), "1" | "true" | "yes");
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 100 {
            return Err(Error::Config(
                "tracker.batch_size must be between 1 and 100".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(
                "tracker.flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "tracker.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.resolved_endpoint().is_empty() {
            return Err(Error::Config("tracker.endpoint must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_flush_interval() -> u64 {
    5000
}

fn default_timeout() -> u64 {
    30
}

fn default_max_attempts() -> usize {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_settle_delay() -> u64 {
    100
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path with env overrides applied
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.tracker.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific path (no env overrides)
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pagebeam/config.toml` (~/.config/pagebeam/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pagebeam").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/pagebeam/` (~/.local/state/pagebeam/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pagebeam")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/pagebeam/pagebeam.log` (~/.local/state/pagebeam/pagebeam.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("pagebeam.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
