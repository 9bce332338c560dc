//! Runtime configuration, loaded from a TOML file and/or `VANISH_CHAT_*` environment variables.

use crate::libs::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// How long a vanish message stays readable after it is seen.
pub const DEFAULT_VANISH_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_POOL_SIZE: u32 = 8;
pub const DEFAULT_DATABASE_PATH: &str = "vanish_chat.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    FileReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Maximum pooled database connections
    pub pool_size: u32,

    /// Delay between a vanish message being seen and its deletion
    #[serde(with = "humantime_serde")]
    pub vanish_delay: Duration,

    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
    pub json_format: bool,
    pub with_target: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            pool_size: DEFAULT_POOL_SIZE,
            vanish_delay: DEFAULT_VANISH_DELAY,
            logging: LoggingSection::default(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            with_target: true,
        }
    }
}

impl LoggingSection {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig::new(self.level)
            .json_format(self.json_format)
            .with_target(self.with_target)
    }
}

impl ChatConfig {
    /// Defaults overridden by any `VANISH_CHAT_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file; environment variables still take precedence.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let mut config = Self::parse_toml(&contents)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_toml(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = env::var("VANISH_CHAT_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(pool_size) = env::var("VANISH_CHAT_POOL_SIZE") {
            self.pool_size = pool_size
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid pool size: {}", e)))?;
        }
        if let Ok(delay) = env::var("VANISH_CHAT_VANISH_DELAY") {
            self.vanish_delay = humantime_serde::re::humantime::parse_duration(&delay)
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid vanish delay: {}", e)))?;
        }
        if let Ok(level) = env::var("VANISH_CHAT_LOG_LEVEL") {
            self.logging.level = level
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid log level: {}", e)))?;
        }
        if let Ok(json) = env::var("VANISH_CHAT_LOG_JSON") {
            self.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid log format flag: {}", e)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vanish_delay.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "vanish_delay must be greater than 0".to_string(),
            ));
        }
        if i64::try_from(self.vanish_delay.as_millis()).is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "vanish_delay of {}ms is too large",
                self.vanish_delay.as_millis()
            )));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool_size must be greater than 0".to_string(),
            ));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
