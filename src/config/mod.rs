//! Configuration management for oi-archive
//!
//! One TOML file can describe both sides: the `[coordinator]` section is
//! read by `serve`, the `[plugin]` section by `push`. Environment variables
//! override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::coordinator::{ClientConfig, CoordinatorConfig};
use crate::plugin::RuntimeConfig;
use crate::protocol::{PluginInfo, DEFAULT_COORDINATOR_ADDR};
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator server configuration
    pub coordinator: CoordinatorConfig,

    /// Plugin runtime configuration
    pub plugin: PluginSection,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Plugin runtime settings as written in a config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    /// Plugin id (`[A-Za-z0-9_-]`, at most 64 chars)
    pub id: String,

    /// Human-readable plugin name
    pub name: String,

    /// Coordinator base URL
    pub coordinator_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Seconds between update cycles, 0 for a single cycle
    pub update_interval_secs: u64,

    /// Known problems refreshed per cycle
    pub update_limit: usize,

    /// Send Deregister when stopping
    pub deregister_on_stop: bool,

    /// Backoff for Register
    pub register_retry: RetryConfig,

    /// Backoff for Update
    pub update_retry: RetryConfig,
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            coordinator_url: format!("http://{DEFAULT_COORDINATOR_ADDR}"),
            timeout_secs: 30,
            update_interval_secs: 0,
            update_limit: 100,
            deregister_on_stop: false,
            register_retry: RetryConfig::default(),
            update_retry: RetryConfig::new(3),
        }
    }
}

impl PluginSection {
    /// Build a runtime configuration, validating the identity
    pub fn runtime_config(&self) -> Result<RuntimeConfig> {
        let info = PluginInfo::new(self.id.clone(), self.name.clone());
        info.validate()
            .with_context(|| format!("Invalid plugin identity '{}'", self.id))?;

        let mut config = RuntimeConfig::new(info)
            .with_register_retry(self.register_retry.clone())
            .with_update_retry(self.update_retry.clone())
            .with_update_limit(self.update_limit)
            .with_deregister_on_stop(self.deregister_on_stop);
        config.client = ClientConfig::new(self.coordinator_url.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs));
        if self.update_interval_secs > 0 {
            config = config.with_update_interval(Duration::from_secs(self.update_interval_secs));
        }

        Ok(config)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_env()?;
        Ok(config)
    }

    /// Apply `OI_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.coordinator
            .apply_env()
            .context("Invalid coordinator environment")?;

        if let Ok(id) = std::env::var("OI_PLUGIN_ID") {
            self.plugin.id = id;
        }
        if let Ok(name) = std::env::var("OI_PLUGIN_NAME") {
            self.plugin.name = name;
        }
        if let Ok(url) = std::env::var("OI_COORDINATOR_URL") {
            self.plugin.coordinator_url = url;
        }
        if let Some(secs) = std::env::var("OI_UPDATE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.plugin.update_interval_secs = secs;
        }
        if let Ok(level) = std::env::var("OI_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("OI_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.coordinator
            .validate()
            .context("Invalid coordinator configuration")?;

        if self.plugin.timeout_secs == 0 {
            anyhow::bail!("plugin.timeout_secs must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }
}
