//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::protocol::{validate_id, BatchLimits, DEFAULT_COORDINATOR_ADDR};
use crate::store::StoreConfig;

/// Configuration for the Coordinator server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Maximum registered plugins
    pub max_plugins: usize,

    /// Run every plugin in debug mode unless overridden per id
    pub debug_all: bool,

    /// Plugin ids that run in debug mode
    pub debug_plugins: Vec<String>,

    /// Maximum files in one batch
    pub max_files_per_batch: usize,

    /// Maximum total content bytes in one batch
    pub max_batch_bytes: usize,

    /// Backing store
    pub store: StoreConfig,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let limits = BatchLimits::default();
        Self {
            bind_address: default_bind_address(),
            max_plugins: 1024,
            debug_all: false,
            debug_plugins: Vec::new(),
            max_files_per_batch: limits.max_files,
            max_batch_bytes: limits.max_bytes,
            store: StoreConfig::default(),
            enable_cors: false,
            enable_request_logging: true,
        }
    }
}

fn default_bind_address() -> SocketAddr {
    DEFAULT_COORDINATOR_ADDR
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 27381)))
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Batch limits derived from this config
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_files: self.max_files_per_batch,
            max_bytes: self.max_batch_bytes,
        }
    }

    /// Apply `OI_COORDINATOR_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = std::env::var("OI_COORDINATOR_ADDR") {
            self.bind_address = addr.parse().map_err(|_| ConfigError::InvalidValue {
                field: "bind_address".to_string(),
                reason: format!("Invalid address: {addr}"),
            })?;
        }

        if let Ok(ids) = std::env::var("OI_DEBUG_PLUGINS") {
            self.debug_plugins = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(flag) = std::env::var("OI_DEBUG_ALL") {
            self.debug_all = flag.eq_ignore_ascii_case("true") || flag == "1";
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_plugins == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_plugins".to_string(),
                reason: "Must allow at least 1 plugin".to_string(),
            });
        }

        if self.max_files_per_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_files_per_batch".to_string(),
                reason: "Must allow at least 1 file".to_string(),
            });
        }

        if self.max_batch_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_batch_bytes".to_string(),
                reason: "Must be positive".to_string(),
            });
        }

        for id in &self.debug_plugins {
            validate_id(id).map_err(|e| ConfigError::InvalidValue {
                field: "debug_plugins".to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    max_plugins: Option<usize>,
    debug_all: Option<bool>,
    debug_plugins: Vec<String>,
    max_files_per_batch: Option<usize>,
    max_batch_bytes: Option<usize>,
    store: Option<StoreConfig>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl CoordinatorConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?);
        Ok(self)
    }

    /// Set max plugins
    pub fn max_plugins(mut self, max: usize) -> Self {
        self.max_plugins = Some(max);
        self
    }

    /// Put every plugin in debug mode by default
    pub fn debug_all(mut self, enabled: bool) -> Self {
        self.debug_all = Some(enabled);
        self
    }

    /// Put one plugin id in debug mode
    pub fn debug_plugin(mut self, id: impl Into<String>) -> Self {
        self.debug_plugins.push(id.into());
        self
    }

    /// Set the per-batch file limit
    pub fn max_files_per_batch(mut self, max: usize) -> Self {
        self.max_files_per_batch = Some(max);
        self
    }

    /// Set the per-batch byte limit
    pub fn max_batch_bytes(mut self, max: usize) -> Self {
        self.max_batch_bytes = Some(max);
        self
    }

    /// Set the backing store
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            max_plugins: self.max_plugins.unwrap_or(defaults.max_plugins),
            debug_all: self.debug_all.unwrap_or(defaults.debug_all),
            debug_plugins: self.debug_plugins,
            max_files_per_batch: self
                .max_files_per_batch
                .unwrap_or(defaults.max_files_per_batch),
            max_batch_bytes: self.max_batch_bytes.unwrap_or(defaults.max_batch_bytes),
            store: self.store.unwrap_or(defaults.store),
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
