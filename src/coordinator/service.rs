//! Coordinator service
//!
//! Transport-agnostic implementation of the coordinator side of the protocol.
//! The HTTP layer in [`super::api`] is a thin adapter over [`Coordinator`].

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use super::config::CoordinatorConfig;
use super::registry::{DebugPolicy, PluginRegistry, RegistrationState, RegistryError};
use crate::metrics;
use crate::protocol::{
    validate_batch, validate_id, BatchLimits, DeregisterResponse, ErrorCode, ProblemList, RegisterRequest,
    RegisterResponse, UpdateRequest, UpdateResponse, ValidationError, PROBLEM_LIST_PATH,
};
use crate::store::{ApplyOutcome, Revision, SharedStore, StoreError, StoreStats};

/// Errors returned by coordinator operations
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("plugin '{0}' is not registered")]
    UnregisteredPlugin(String),

    #[error("update already in progress for plugin '{0}'")]
    Busy(String),

    #[error("registry at capacity: {current}/{max}")]
    CapacityExceeded { current: usize, max: usize },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Wire code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::UnregisteredPlugin(_) => ErrorCode::UnregisteredPlugin,
            Self::Busy(_) => ErrorCode::Busy,
            Self::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            Self::Store(_) => ErrorCode::Store,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<RegistryError> for CoordinatorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Invalid(e) => Self::Validation(e),
            RegistryError::NotRegistered(id) => Self::UnregisteredPlugin(id),
            RegistryError::Busy(id) => Self::Busy(id),
            RegistryError::CapacityExceeded { current, max } => {
                Self::CapacityExceeded { current, max }
            }
        }
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Central coordinator: registry, batch validation and store access
pub struct Coordinator {
    registry: Arc<PluginRegistry>,
    store: SharedStore,
    limits: BatchLimits,
}

impl Coordinator {
    /// Create a coordinator over an already opened store
    pub fn new(config: &CoordinatorConfig, store: SharedStore) -> Self {
        let policy = DebugPolicy::new(config.debug_all, config.debug_plugins.iter().cloned());
        Self {
            registry: Arc::new(PluginRegistry::new(config.max_plugins, policy)),
            store,
            limits: config.batch_limits(),
        }
    }

    /// Create a coordinator, opening the configured store
    pub fn from_config(config: &CoordinatorConfig) -> CoordinatorResult<Self> {
        let store = config.store.open()?;
        Ok(Self::new(config, store))
    }

    /// Plugin registry
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Backing store
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Batch limits enforced on updates
    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Handle a registration
    pub async fn register(&self, request: RegisterRequest) -> CoordinatorResult<RegisterResponse> {
        let state = self.registry.register(request.info).await?;

        metrics::record_registration(state.debug_mode);
        metrics::set_registered_plugins(self.registry.stats().await.total_plugins);

        Ok(RegisterResponse {
            debug_mode: state.debug_mode,
        })
    }

    /// Handle an update
    ///
    /// Identity is checked before the batch, so an unregistered id is reported
    /// as such whatever the batch holds. Updates correlate by id only; the
    /// name was checked at registration.
    pub async fn update(&self, request: UpdateRequest) -> CoordinatorResult<UpdateResponse> {
        let UpdateRequest { info, file: batch } = request;
        validate_id(info.id())?;

        let permit = match self.registry.begin_update(info.id()).await {
            Ok(permit) => permit,
            Err(e) => {
                metrics::record_update(rejection_label(&e));
                return Err(e.into());
            }
        };

        if let Err(e) = validate_batch(&batch, &self.limits) {
            tracing::warn!(plugin_id = %info.id(), error = %e, "Rejected batch");
            metrics::record_update("invalid");
            return Err(e.into());
        }

        let store = self.store.clone();
        let registry = self.registry.clone();
        let plugin_id = info.id().to_string();

        // Runs on its own task so a dropped request cannot stop an accepted
        // batch half way through its bookkeeping.
        let task = tokio::spawn(async move {
            let started = Instant::now();

            let outcome = if permit.debug_mode() {
                ApplyOutcome {
                    files_applied: batch.len(),
                    files_changed: 0,
                    revision: None,
                }
            } else {
                let id = plugin_id.clone();
                tokio::task::spawn_blocking(move || store.apply(&id, &batch))
                    .await
                    .map_err(|e| CoordinatorError::Internal(e.to_string()))??
            };

            registry
                .record_update(permit.plugin_id(), outcome.files_applied)
                .await;
            metrics::observe_apply_duration(started.elapsed().as_secs_f64());

            Ok::<_, CoordinatorError>((outcome, permit.debug_mode()))
        });

        let result = task
            .await
            .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

        match result {
            Ok((outcome, dry_run)) => {
                tracing::info!(
                    plugin_id = %info.id(),
                    files_applied = outcome.files_applied,
                    files_changed = outcome.files_changed,
                    dry_run,
                    "Batch accepted"
                );
                metrics::record_update(if dry_run { "dry_run" } else { "applied" });
                metrics::record_files_applied(outcome.files_applied);

                Ok(UpdateResponse::applied(
                    outcome.files_applied,
                    outcome.files_changed,
                    dry_run,
                ))
            }
            Err(e) => {
                tracing::error!(plugin_id = %info.id(), error = %e, "Batch apply failed");
                metrics::record_update("failed");
                Err(e)
            }
        }
    }

    /// Remove a registration
    pub async fn deregister(&self, id: &str) -> CoordinatorResult<DeregisterResponse> {
        let removed = self.registry.deregister(id).await.is_some();
        metrics::set_registered_plugins(self.registry.stats().await.total_plugins);
        Ok(DeregisterResponse { removed })
    }

    /// Stored problem list of a registered plugin
    ///
    /// Empty when the plugin never submitted one. A stored list that does not
    /// parse is also treated as empty.
    pub async fn problem_list(&self, id: &str) -> CoordinatorResult<ProblemList> {
        self.require_registered(id).await?;

        let content = self.read_file(id, PROBLEM_LIST_PATH).await?;
        let Some(content) = content else {
            return Ok(ProblemList::new());
        };

        match serde_json::from_str::<ProblemList>(&content) {
            Ok(list) => Ok(list),
            Err(e) => {
                tracing::warn!(plugin_id = %id, error = %e, "Stored problem list is not valid JSON");
                Ok(ProblemList::new())
            }
        }
    }

    /// State of one registered plugin
    pub async fn plugin(&self, id: &str) -> CoordinatorResult<RegistrationState> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| CoordinatorError::UnregisteredPlugin(id.to_string()))
    }

    /// Recent revisions of a plugin, newest first
    pub async fn revisions(&self, id: &str, limit: usize) -> CoordinatorResult<Vec<Revision>> {
        let store = self.store.clone();
        let id = id.to_string();
        let revisions = tokio::task::spawn_blocking(move || store.revisions(&id, limit))
            .await
            .map_err(|e| CoordinatorError::Internal(e.to_string()))??;
        Ok(revisions)
    }

    /// Change the debug policy of an id
    pub async fn set_debug(&self, id: &str, enabled: bool) -> CoordinatorResult<()> {
        self.registry.set_debug(id, enabled).await?;
        Ok(())
    }

    /// Store-wide counters
    pub async fn store_stats(&self) -> CoordinatorResult<StoreStats> {
        let store = self.store.clone();
        let stats = tokio::task::spawn_blocking(move || store.stats())
            .await
            .map_err(|e| CoordinatorError::Internal(e.to_string()))??;
        Ok(stats)
    }

    async fn require_registered(&self, id: &str) -> CoordinatorResult<()> {
        if self.registry.is_registered(id).await {
            Ok(())
        } else {
            Err(CoordinatorError::UnregisteredPlugin(id.to_string()))
        }
    }

    async fn read_file(&self, id: &str, path: &str) -> CoordinatorResult<Option<String>> {
        let store = self.store.clone();
        let id = id.to_string();
        let path = path.to_string();
        let content = tokio::task::spawn_blocking(move || store.get_text(&id, &path))
            .await
            .map_err(|e| CoordinatorError::Internal(e.to_string()))??;
        Ok(content)
    }
}

fn rejection_label(err: &RegistryError) -> &'static str {
    match err {
        RegistryError::Invalid(_) => "invalid",
        RegistryError::NotRegistered(_) => "unregistered",
        RegistryError::Busy(_) => "busy",
        RegistryError::CapacityExceeded { .. } => "capacity",
    }
}
