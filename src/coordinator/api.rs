//! REST API handlers for the Coordinator server
//!
//! Protocol routes answer with the bare protocol types; introspection routes
//! wrap their payload in [`ApiResponse`]. Every failure is an
//! [`ErrorResponse`] with a status derived from its [`ErrorCode`].

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::protocol::{
    DebugModeRequest, DeregisterRequest, ErrorCode, ErrorResponse, RegisterRequest, UpdateRequest,
};
use crate::store::StoreStats;

use super::registry::{RegistrationState, RegistryStats};
use super::server::AppState;
use super::service::CoordinatorError;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Plugin list response
#[derive(Debug, Serialize, Deserialize)]
pub struct PluginsResponse {
    pub plugins: Vec<RegistrationState>,
    pub stats: RegistryStats,
}

/// Coordinator-wide statistics
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub registry: RegistryStats,
    pub store: StoreStats,
    pub uptime_secs: u64,
}

/// Query for revision history
#[derive(Debug, Deserialize)]
pub struct RevisionsQuery {
    #[serde(default = "default_revision_limit")]
    pub limit: usize,
}

fn default_revision_limit() -> usize {
    20
}

/// HTTP status for a wire error code
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::UnregisteredPlugin => StatusCode::NOT_FOUND,
        ErrorCode::Busy => StatusCode::CONFLICT,
        ErrorCode::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Store | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let code = self.code();
        (
            status_for(code),
            Json(ErrorResponse::new(code, self.to_string())),
        )
            .into_response()
    }
}

fn rejection(err: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(ErrorCode::Validation, err.body_text())),
    )
        .into_response()
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        // Protocol endpoints
        .route("/api/plugins/register", post(register_plugin))
        .route("/api/plugins/update", post(update_plugin))
        .route("/api/plugins/deregister", post(deregister_plugin))
        // Plugin endpoints
        .route("/api/plugins", get(list_plugins))
        .route("/api/plugins/{id}", get(get_plugin))
        .route("/api/plugins/{id}/problemlist", get(get_problem_list))
        .route("/api/plugins/{id}/revisions", get(get_revisions))
        .route("/api/plugins/{id}/debug", post(set_debug_mode))
        // Stats endpoints
        .route("/api/stats", get(get_stats))
        .with_state(state)
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
    }))
}

/// Prometheus exposition endpoint
async fn metrics_endpoint() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => CoordinatorError::Internal(e.to_string()).into_response(),
    }
}

// ============================================================================
// Protocol Handlers
// ============================================================================

/// Register a plugin
async fn register_plugin(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return rejection(e),
    };

    match state.coordinator.register(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Registration rejected");
            e.into_response()
        }
    }
}

/// Submit a file batch
async fn update_plugin(
    State(state): State<AppState>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return rejection(e),
    };

    match state.coordinator.update(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Remove a registration
async fn deregister_plugin(
    State(state): State<AppState>,
    payload: Result<Json<DeregisterRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return rejection(e),
    };

    match state.coordinator.deregister(&request.id).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Plugin Handlers
// ============================================================================

/// List all registered plugins
async fn list_plugins(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.coordinator.registry();
    let plugins = registry.all().await;
    let stats = registry.stats().await;

    Json(ApiResponse::success(PluginsResponse { plugins, stats }))
}

/// Get a specific plugin
async fn get_plugin(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.coordinator.plugin(&id).await {
        Ok(info) => (StatusCode::OK, Json(ApiResponse::success(info))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Stored problem list of a plugin
async fn get_problem_list(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.coordinator.problem_list(&id).await {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Recent revisions of a plugin
async fn get_revisions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RevisionsQuery>,
) -> Response {
    match state.coordinator.revisions(&id, query.limit).await {
        Ok(revisions) => (StatusCode::OK, Json(ApiResponse::success(revisions))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Change the debug policy for a plugin id
async fn set_debug_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<DebugModeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return rejection(e),
    };

    match state.coordinator.set_debug(&id, request.enabled).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(format!(
                "Debug mode {} for {} (applies at next registration)",
                if request.enabled { "enabled" } else { "disabled" },
                id
            ))),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Stats Handlers
// ============================================================================

/// Get coordinator stats
async fn get_stats(State(state): State<AppState>) -> Response {
    let registry = state.coordinator.registry().stats().await;
    let store = match state.coordinator.store_stats().await {
        Ok(stats) => stats,
        Err(e) => return e.into_response(),
    };

    Json(ApiResponse::success(StatsResponse {
        registry,
        store,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
    .into_response()
}

// ============================================================================
// Tests
// ============================================================================
