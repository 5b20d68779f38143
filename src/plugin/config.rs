//! Plugin runtime configuration

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::coordinator::ClientConfig;
use crate::protocol::{PluginInfo, DEFAULT_COORDINATOR_ADDR};
use crate::utils::retry::RetryConfig;

/// Configuration for one plugin runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Identity sent with every request
    pub info: PluginInfo,

    /// Coordinator address and request timeout
    pub client: ClientConfig,

    /// Backoff for Register transport failures
    pub register_retry: RetryConfig,

    /// Backoff for resending one batch
    pub update_retry: RetryConfig,

    /// `None` runs one cycle and stops; `Some` repeats until shutdown
    pub update_interval: Option<Duration>,

    /// Hint handed to the update hook (how many problems to refresh)
    pub update_limit: usize,

    /// Send Deregister while stopping
    pub deregister_on_stop: bool,
}

impl RuntimeConfig {
    /// Create a config with defaults for everything but the identity
    pub fn new(info: PluginInfo) -> Self {
        Self {
            info,
            client: ClientConfig::default(),
            register_retry: RetryConfig::default(),
            update_retry: RetryConfig::new(3),
            update_interval: None,
            update_limit: 100,
            deregister_on_stop: false,
        }
    }

    /// Load configuration from environment variables
    ///
    /// `OI_PLUGIN_ID` and `OI_PLUGIN_NAME` are required.
    pub fn from_env() -> Result<Self, RuntimeConfigError> {
        let id = env::var("OI_PLUGIN_ID")
            .map_err(|_| RuntimeConfigError::MissingEnvVar("OI_PLUGIN_ID".to_string()))?;
        let name = env::var("OI_PLUGIN_NAME")
            .map_err(|_| RuntimeConfigError::MissingEnvVar("OI_PLUGIN_NAME".to_string()))?;

        let info = PluginInfo::new(id, name);
        info.validate()
            .map_err(|e| RuntimeConfigError::InvalidIdentity(e.to_string()))?;

        let coordinator_url = env::var("OI_COORDINATOR_URL")
            .unwrap_or_else(|_| format!("http://{DEFAULT_COORDINATOR_ADDR}"));
        let timeout_secs = env::var("OI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let mut config = Self::new(info);
        config.client = ClientConfig::new(coordinator_url).with_timeout(Duration::from_secs(timeout_secs));
        config.update_interval = env::var("OI_UPDATE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        config.update_limit = env::var("OI_UPDATE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.update_limit);
        config.register_retry.max_retries = env::var("OI_REGISTER_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.register_retry.max_retries);
        config.deregister_on_stop = env::var("OI_DEREGISTER_ON_STOP")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(config)
    }

    /// Set the coordinator URL
    pub fn with_coordinator_url(mut self, url: impl Into<String>) -> Self {
        self.client = ClientConfig::new(url).with_timeout(self.client.timeout);
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client.timeout = timeout;
        self
    }

    /// Repeat update cycles at a fixed interval
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    /// Set the update hook's limit hint
    pub fn with_update_limit(mut self, limit: usize) -> Self {
        self.update_limit = limit;
        self
    }

    /// Set the Register backoff
    pub fn with_register_retry(mut self, retry: RetryConfig) -> Self {
        self.register_retry = retry;
        self
    }

    /// Set the Update backoff
    pub fn with_update_retry(mut self, retry: RetryConfig) -> Self {
        self.update_retry = retry;
        self
    }

    /// Deregister during stop
    pub fn with_deregister_on_stop(mut self, enabled: bool) -> Self {
        self.deregister_on_stop = enabled;
        self
    }
}

/// Runtime configuration errors
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid plugin identity: {0}")]
    InvalidIdentity(String),
}
