//! Coordinator client for crawler plugins
//!
//! Every call is a single attempt; retry policy belongs to the caller (see
//! [`crate::plugin::runtime`]), which uses [`ClientError::is_retryable`] to
//! decide.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    DeregisterRequest, DeregisterResponse, ErrorCode, ErrorResponse, FileBatch, PluginInfo,
    ProblemList, RegisterRequest, RegisterResponse, UpdateRequest, UpdateResponse,
    DEFAULT_COORDINATOR_ADDR,
};

use super::api::{ApiResponse, HealthResponse, PluginsResponse};
use super::registry::RegistrationState;

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator server URL
    pub coordinator_url: String,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(format!("http://{DEFAULT_COORDINATOR_ADDR}"))
    }
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for communicating with the Coordinator server
///
/// Owns the HTTP connection pool; one client is the session's connection.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Coordinator base URL
    pub fn coordinator_url(&self) -> &str {
        &self.config.coordinator_url
    }

    /// Register a plugin identity
    pub async fn register(&self, info: &PluginInfo) -> Result<RegisterResponse, ClientError> {
        let request = RegisterRequest { info: info.clone() };
        self.post("/api/plugins/register", &request).await
    }

    /// Submit a file batch
    ///
    /// A response with `ok == false` is turned into an error so callers only
    /// ever see acknowledged batches as `Ok`.
    pub async fn update(
        &self,
        info: &PluginInfo,
        batch: FileBatch,
    ) -> Result<UpdateResponse, ClientError> {
        let request = UpdateRequest {
            info: info.clone(),
            file: batch,
        };
        let response: UpdateResponse = self.post("/api/plugins/update", &request).await?;

        if !response.ok {
            return Err(ClientError::Rejected {
                code: ErrorCode::Internal,
                reason: response.reason,
            });
        }
        Ok(response)
    }

    /// Remove a plugin's registration
    pub async fn deregister(&self, id: &str) -> Result<DeregisterResponse, ClientError> {
        let request = DeregisterRequest { id: id.to_string() };
        self.post("/api/plugins/deregister", &request).await
    }

    /// Stored problem list of a plugin
    pub async fn problem_list(&self, id: &str) -> Result<ProblemList, ClientError> {
        self.get(&format!("/api/plugins/{id}/problemlist")).await
    }

    /// Check coordinator health
    pub async fn health_check(&self) -> Result<HealthStatus, ClientError> {
        let response: ApiResponse<HealthResponse> = self.get("/api/health").await?;

        if let Some(health) = response.data {
            Ok(HealthStatus {
                healthy: health.status == "healthy",
                version: health.version,
                uptime_secs: health.uptime_secs,
            })
        } else {
            Err(ClientError::InvalidResponse("Missing health data".to_string()))
        }
    }

    /// All registered plugins
    pub async fn list_plugins(&self) -> Result<Vec<RegistrationState>, ClientError> {
        let response: ApiResponse<PluginsResponse> = self.get("/api/plugins").await?;
        response
            .data
            .map(|d| d.plugins)
            .ok_or_else(|| ClientError::InvalidResponse("Missing plugin list".to_string()))
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        let url = format!("{}{}", self.config.coordinator_url, path);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, ClientError> {
        let url = format!("{}{}", self.config.coordinator_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, ClientError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| ClientError::InvalidResponse(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(body) => Err(ClientError::from_error_response(body)),
            // Not one of ours (proxy, body limit, ...): classify by status.
            Err(_) if status.as_u16() == 413 || status.is_client_error() => {
                Err(ClientError::Validation(format!("HTTP {status}: {text}")))
            }
            Err(_) => Err(ClientError::Transport(format!("HTTP {status}: {text}"))),
        }
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Client could not be built
    #[error("client initialization error: {0}")]
    Init(String),

    /// Connection refused, timeout, or an unclassified server failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed identity or batch
    #[error("validation error: {0}")]
    Validation(String),

    /// The coordinator has no registration for the id
    #[error("plugin not registered: {0}")]
    UnregisteredPlugin(String),

    /// Another update for the id is in flight
    #[error("coordinator busy: {0}")]
    Busy(String),

    /// Any other coordinator-reported failure
    #[error("coordinator rejected request ({code}): {reason}")]
    Rejected { code: ErrorCode, reason: String },

    /// Response body did not match the protocol
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Map a coordinator error body
    pub fn from_error_response(body: ErrorResponse) -> Self {
        match body.code {
            ErrorCode::Validation => Self::Validation(body.reason),
            ErrorCode::UnregisteredPlugin => Self::UnregisteredPlugin(body.reason),
            ErrorCode::Busy => Self::Busy(body.reason),
            code => Self::Rejected {
                code,
                reason: body.reason,
            },
        }
    }

    /// Whether resending the same request can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Busy(_) => true,
            Self::Rejected { code, .. } => {
                matches!(code, ErrorCode::Store | ErrorCode::CapacityExceeded)
            }
            Self::Init(_)
            | Self::Validation(_)
            | Self::UnregisteredPlugin(_)
            | Self::InvalidResponse(_) => false,
        }
    }

    /// Whether the session cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Init(_) | Self::Validation(_) | Self::UnregisteredPlugin(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
