//! Plugin registry for tracking registered crawler plugins
//!
//! Holds one [`RegistrationState`] per plugin id, decides the debug mode handed
//! out at registration, and serializes updates per id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::protocol::{validate_id, PluginInfo, ValidationError};

// ============================================================================
// Registration State
// ============================================================================

/// Coordinator-side record of one registered plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationState {
    /// Identity sent at registration
    pub info: PluginInfo,

    /// Mode assigned at registration, fixed for the session
    pub debug_mode: bool,

    /// When the current session registered
    pub registered_at: DateTime<Utc>,

    /// Last successful update, if any
    pub last_update_at: Option<DateTime<Utc>>,

    /// Successful updates in this session
    pub updates_applied: u64,

    /// Files accepted in this session
    pub files_applied: u64,
}

impl RegistrationState {
    /// Create a fresh state
    pub fn new(info: PluginInfo, debug_mode: bool) -> Self {
        Self {
            info,
            debug_mode,
            registered_at: Utc::now(),
            last_update_at: None,
            updates_applied: 0,
            files_applied: 0,
        }
    }

    /// Record one successful update
    pub fn record_update(&mut self, files: usize) {
        self.last_update_at = Some(Utc::now());
        self.updates_applied += 1;
        self.files_applied += files as u64;
    }
}

// ============================================================================
// Debug Policy
// ============================================================================

/// Operator policy deciding which plugins register in debug mode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugPolicy {
    /// Default for ids without an explicit setting
    pub debug_all: bool,

    /// Per-id overrides
    pub overrides: HashMap<String, bool>,
}

impl DebugPolicy {
    /// Build a policy from a default and a list of debug ids
    pub fn new(debug_all: bool, debug_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            debug_all,
            overrides: debug_ids.into_iter().map(|id| (id, true)).collect(),
        }
    }

    /// Mode for one id
    pub fn is_debug(&self, id: &str) -> bool {
        self.overrides.get(id).copied().unwrap_or(self.debug_all)
    }
}

// ============================================================================
// Update Permit
// ============================================================================

/// Exclusive right to apply one batch for a plugin id
///
/// Dropping the permit lets the next update for that id in.
pub struct UpdatePermit {
    plugin_id: String,
    debug_mode: bool,
    _guard: OwnedMutexGuard<()>,
}

impl UpdatePermit {
    /// Plugin the permit was issued for
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Mode of the session the permit belongs to
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }
}

impl std::fmt::Debug for UpdatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdatePermit")
            .field("plugin_id", &self.plugin_id)
            .field("debug_mode", &self.debug_mode)
            .finish()
    }
}

// ============================================================================
// Plugin Registry
// ============================================================================

/// Registry for tracking all crawler plugins
pub struct PluginRegistry {
    /// Registered plugins by id
    plugins: RwLock<HashMap<String, RegistrationState>>,

    /// Per-id update slots, kept across deregistration so an in-flight
    /// update still blocks the next session's first one
    update_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,

    /// Debug mode policy
    debug: RwLock<DebugPolicy>,

    /// Max plugins allowed
    max_plugins: usize,
}

impl PluginRegistry {
    /// Create a new registry
    pub fn new(max_plugins: usize, debug: DebugPolicy) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            update_locks: RwLock::new(HashMap::new()),
            debug: RwLock::new(debug),
            max_plugins,
        }
    }

    /// Register a plugin, replacing any previous session for the same id
    ///
    /// Returns the state now held for the id.
    pub async fn register(&self, info: PluginInfo) -> Result<RegistrationState, RegistryError> {
        info.validate().map_err(RegistryError::Invalid)?;

        let debug_mode = self.debug.read().await.is_debug(info.id());
        let mut plugins = self.plugins.write().await;

        // Check if at capacity (excluding re-registration)
        if !plugins.contains_key(info.id()) && plugins.len() >= self.max_plugins {
            return Err(RegistryError::CapacityExceeded {
                current: plugins.len(),
                max: self.max_plugins,
            });
        }

        let id = info.id().to_string();
        let state = RegistrationState::new(info, debug_mode);

        match plugins.get_mut(&id) {
            Some(current) => {
                tracing::info!(plugin_id = %id, debug_mode, "Plugin re-registered, previous session replaced");
                *current = state.clone();
            }
            None => {
                tracing::info!(plugin_id = %id, debug_mode, "Plugin registered");
                plugins.insert(id, state.clone());
            }
        }

        Ok(state)
    }

    /// Acquire the update slot of a registered plugin
    ///
    /// Fails with `Busy` instead of waiting when another update holds it.
    pub async fn begin_update(&self, id: &str) -> Result<UpdatePermit, RegistryError> {
        let plugins = self.plugins.read().await;
        let state = plugins
            .get(id)
            .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;

        let lock = self
            .update_locks
            .write()
            .await
            .entry(id.to_string())
            .or_default()
            .clone();
        let guard = lock
            .try_lock_owned()
            .map_err(|_| RegistryError::Busy(id.to_string()))?;

        Ok(UpdatePermit {
            plugin_id: id.to_string(),
            debug_mode: state.debug_mode,
            _guard: guard,
        })
    }

    /// Record a successful update
    ///
    /// A plugin deregistered while its update was in flight stays deregistered.
    pub async fn record_update(&self, id: &str, files: usize) {
        if let Some(state) = self.plugins.write().await.get_mut(id) {
            state.record_update(files);
        }
    }

    /// Get one plugin's state
    pub async fn get(&self, id: &str) -> Option<RegistrationState> {
        self.plugins.read().await.get(id).cloned()
    }

    /// Check whether an id is registered
    pub async fn is_registered(&self, id: &str) -> bool {
        self.plugins.read().await.contains_key(id)
    }

    /// Get all plugins, sorted by id
    pub async fn all(&self) -> Vec<RegistrationState> {
        let mut states: Vec<_> = self
            .plugins
            .read()
            .await
            .values()
            .cloned()
            .collect();
        states.sort_by(|a, b| a.info.id().cmp(b.info.id()));
        states
    }

    /// Remove a plugin
    pub async fn deregister(&self, id: &str) -> Option<RegistrationState> {
        let removed = self.plugins.write().await.remove(id);
        if removed.is_some() {
            tracing::info!(plugin_id = %id, "Plugin deregistered");
        }
        removed
    }

    /// Change the debug policy of one id
    ///
    /// Takes effect at the id's next registration.
    pub async fn set_debug(&self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        validate_id(id).map_err(RegistryError::Invalid)?;
        self.debug
            .write()
            .await
            .overrides
            .insert(id.to_string(), enabled);
        tracing::info!(plugin_id = %id, enabled, "Debug policy changed");
        Ok(())
    }

    /// Ids currently configured for debug mode (explicit overrides only)
    pub async fn debug_ids(&self) -> HashSet<String> {
        self.debug
            .read()
            .await
            .overrides
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let plugins = self.plugins.read().await;

        let mut debug = 0;
        let mut updates_applied = 0;
        let mut files_applied = 0;

        for state in plugins.values() {
            if state.debug_mode {
                debug += 1;
            }
            updates_applied += state.updates_applied;
            files_applied += state.files_applied;
        }

        RegistryStats {
            total_plugins: plugins.len(),
            debug,
            production: plugins.len() - debug,
            updates_applied,
            files_applied,
        }
    }

    /// Max plugins allowed
    pub fn max_plugins(&self) -> usize {
        self.max_plugins
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_plugins: usize,
    pub debug: usize,
    pub production: usize,
    pub updates_applied: u64,
    pub files_applied: u64,
}

impl RegistryStats {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Registry Stats\n\
             {:-<30}\n\
             Total Plugins: {}\n\
             - Production: {}\n\
             - Debug: {}\n\
             Updates Applied: {}\n\
             Files Applied: {}",
            "",
            self.total_plugins,
            self.production,
            self.debug,
            self.updates_applied,
            self.files_applied
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Registry errors
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Malformed plugin identity
    Invalid(ValidationError),

    /// No registration for the id
    NotRegistered(String),

    /// Another update for the id is in flight
    Busy(String),

    /// Registry at capacity
    CapacityExceeded { current: usize, max: usize },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(e) => write!(f, "{}", e),
            Self::NotRegistered(id) => write!(f, "Plugin not registered: {}", id),
            Self::Busy(id) => write!(f, "Update already in progress for plugin: {}", id),
            Self::CapacityExceeded { current, max } => {
                write!(f, "Registry at capacity: {}/{}", current, max)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ============================================================================
// Tests
// ============================================================================
