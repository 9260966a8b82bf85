//! Configuration management for the provisioner.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/blufi/config.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use blufi_protocol::SessionOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("negotiation_timeout_ms must be between 100 and 120000, got {0}")]
    InvalidNegotiationTimeout(u64),

    #[error("response_timeout_ms must be between 100 and 120000, got {0}")]
    InvalidResponseTimeout(u64),

    #[error("event_capacity must be between 1 and 4096, got {0}")]
    InvalidEventCapacity(usize),

    #[error("invalid session options: {0}")]
    InvalidSession(String),

    #[error("level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Bounds shared by both timeouts, in milliseconds.
const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 120_000;

/// Main configuration structure for the provisioner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Protocol session options.
    pub session: SessionOptions,

    /// Provisioning flow timeouts and buffering.
    pub provisioning: ProvisioningConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

/// Provisioning flow configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// How long to wait for the device's negotiation reply.
    pub negotiation_timeout_ms: u64,

    /// How long to wait for a reply to a request (scan, status, version).
    pub response_timeout_ms: u64,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_ms: 10_000,
            response_timeout_ms: 15_000,
            event_capacity: 64,
        }
    }
}

impl ProvisioningConfig {
    /// Negotiation timeout as a [`Duration`].
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    /// Response timeout as a [`Duration`].
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blufi")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - BLUFI_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - BLUFI_NEGOTIATION_TIMEOUT_MS: Override the negotiation timeout
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("BLUFI_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.logging.level = level;
            }
        }

        if let Ok(value) = std::env::var("BLUFI_NEGOTIATION_TIMEOUT_MS") {
            match value.parse::<u64>() {
                Ok(ms) => {
                    tracing::info!("Overriding negotiation_timeout_ms from environment: {}", ms);
                    self.provisioning.negotiation_timeout_ms = ms;
                }
                Err(_) if value.is_empty() => {}
                Err(_) => {
                    tracing::warn!(
                        "Ignoring BLUFI_NEGOTIATION_TIMEOUT_MS, not a number: {}",
                        value
                    );
                }
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let negotiation = self.provisioning.negotiation_timeout_ms;
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&negotiation) {
            return Err(ConfigError::InvalidNegotiationTimeout(negotiation));
        }

        let response = self.provisioning.response_timeout_ms;
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&response) {
            return Err(ConfigError::InvalidResponseTimeout(response));
        }

        let capacity = self.provisioning.event_capacity;
        if capacity == 0 || capacity > 4096 {
            return Err(ConfigError::InvalidEventCapacity(capacity));
        }

        self.session
            .validate()
            .map_err(|e| ConfigError::InvalidSession(e.to_string()))?;

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// A missing file yields the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", path.display()));
            }
        };

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from `~/.config/blufi/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| {
            anyhow::anyhow!("Invalid TOML configuration: {}", describe_toml_error(&e, source))
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Renders a TOML error with the line and column it points at.
fn describe_toml_error(error: &toml::de::Error, source: &str) -> String {
    let message = error.message().trim_end();
    let Some(span) = error.span() else {
        return message.to_string();
    };

    let before = &source[..span.start.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
    format!("{} (line {}, column {})", message, line, column)
}
