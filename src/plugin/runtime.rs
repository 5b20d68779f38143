//! Plugin runtime
//!
//! Sequences a plugin's hooks around the coordinator protocol and owns the
//! session: the client connection plus the mode handed out at registration.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::RuntimeConfig;
use super::{CrawlerPlugin, UpdateContext};
use crate::coordinator::{ClientError, CoordinatorClient};
use crate::metrics;
use crate::protocol::{PluginInfo, UpdateResponse};
use crate::utils::retry::with_retry_if;

// ============================================================================
// States and Outcomes
// ============================================================================

/// Lifecycle state of a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Created,
    Started,
    Registered,
    Stopped,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Registered => "registered",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Plugin hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Start,
    Update,
    Stop,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Update => "update",
            Self::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Result of one update cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The hook had nothing to submit
    Skipped,

    /// The coordinator acknowledged the batch
    Submitted(UpdateResponse),
}

/// Counters of a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub submitted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub files_applied: u64,

    /// Mode the coordinator assigned, `None` if registration never happened
    pub debug_mode: Option<bool>,
}

impl RunSummary {
    /// Account for one cycle; fatal errors are handed back
    fn record(&mut self, result: Result<CycleOutcome, RuntimeError>) -> Result<(), RuntimeError> {
        self.cycles += 1;
        match result {
            Ok(CycleOutcome::Submitted(ack)) => {
                self.submitted += 1;
                self.files_applied += ack.files_applied as u64;
            }
            Ok(CycleOutcome::Skipped) => self.skipped += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => self.failed += 1,
        }
        Ok(())
    }
}

/// Registration held by a runtime
#[derive(Debug, Clone)]
struct Session {
    debug_mode: bool,
    registered_at: DateTime<Utc>,
    cycles: u64,
}

/// Requests a running [`PluginRuntime::run`] to stop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Ask the runtime to stop after the current step
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

// ============================================================================
// Plugin Runtime
// ============================================================================

/// Hosts one plugin and drives its lifecycle
pub struct PluginRuntime<P> {
    config: RuntimeConfig,
    plugin: P,
    client: CoordinatorClient,
    state: RuntimeState,
    session: Option<Session>,
    start_attempted: bool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<P: CrawlerPlugin> PluginRuntime<P> {
    /// Create a runtime in the `Created` state
    pub fn new(config: RuntimeConfig, plugin: P) -> Result<Self, RuntimeError> {
        let client = CoordinatorClient::new(config.client.clone()).map_err(RuntimeError::Client)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            plugin,
            client,
            state: RuntimeState::Created,
            session: None,
            start_attempted: false,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Plugin identity
    pub fn info(&self) -> &PluginInfo {
        &self.config.info
    }

    /// Mode assigned at registration, `None` before registering
    pub fn debug_mode(&self) -> Option<bool> {
        self.session.as_ref().map(|s| s.debug_mode)
    }

    /// When the current session registered
    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.session.as_ref().map(|s| s.registered_at)
    }

    /// Hosted plugin
    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut P {
        &mut self.plugin
    }

    /// Handle for stopping [`run`](Self::run) from elsewhere
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run the `start` hook
    ///
    /// A failing hook leaves the runtime in `Created`; nothing is sent to the
    /// coordinator.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        self.expect_state("start", RuntimeState::Created)?;
        self.start_attempted = true;

        info!(plugin_id = %self.config.info.id(), "Starting plugin");
        guarded(Hook::Start, self.plugin.start()).await?;

        self.state = RuntimeState::Started;
        Ok(())
    }

    /// Register with the coordinator and store the assigned mode
    ///
    /// Transport failures are retried with backoff; validation failures are
    /// returned at once.
    pub async fn register(&mut self) -> Result<bool, RuntimeError> {
        self.expect_state("register", RuntimeState::Started)?;

        let client = &self.client;
        let info = &self.config.info;
        let response = with_retry_if(
            &self.config.register_retry,
            || client.register(info),
            ClientError::is_retryable,
        )
        .await
        .map_err(RuntimeError::Registration)?;

        info!(
            plugin_id = %info.id(),
            coordinator = %client.coordinator_url(),
            debug_mode = response.debug_mode,
            "Registered with coordinator"
        );

        self.session = Some(Session {
            debug_mode: response.debug_mode,
            registered_at: Utc::now(),
            cycles: 0,
        });
        self.state = RuntimeState::Registered;
        Ok(response.debug_mode)
    }

    /// Run the `update` hook once and submit its batch
    ///
    /// A failing hook skips submission and is returned as a non-fatal error.
    /// An `UnregisteredPlugin` answer ends the session; the runtime drops
    /// back to `Started` and must register again.
    pub async fn run_update_cycle(&mut self) -> Result<CycleOutcome, RuntimeError> {
        self.expect_state("update", RuntimeState::Registered)?;

        let (cycle, debug_mode) = match self.session.as_mut() {
            Some(session) => {
                session.cycles += 1;
                (session.cycles, session.debug_mode)
            }
            None => {
                return Err(RuntimeError::InvalidState {
                    op: "update",
                    state: self.state,
                })
            }
        };

        let plugin_id = self.config.info.id().to_string();
        let ctx = UpdateContext {
            client: &self.client,
            info: &self.config.info,
            debug_mode,
            cycle,
            limit: self.config.update_limit,
        };

        let batch = match guarded(Hook::Update, self.plugin.update(&ctx)).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(plugin_id = %plugin_id, cycle, error = %e, "Update hook failed, skipping cycle");
                metrics::record_cycle(&plugin_id, "hook_failed");
                return Err(e);
            }
        };

        let Some(batch) = batch else {
            debug!(plugin_id = %plugin_id, cycle, "Nothing to submit");
            metrics::record_cycle(&plugin_id, "skipped");
            return Ok(CycleOutcome::Skipped);
        };

        let files = batch.len();
        let client = &self.client;
        let info = &self.config.info;
        let result = with_retry_if(
            &self.config.update_retry,
            || client.update(info, batch.clone()),
            ClientError::is_retryable,
        )
        .await;

        match result {
            Ok(ack) => {
                if ack.dry_run != debug_mode {
                    warn!(
                        plugin_id = %plugin_id,
                        session_debug_mode = debug_mode,
                        dry_run = ack.dry_run,
                        "Coordinator mode differs from the registered session"
                    );
                }
                info!(
                    plugin_id = %plugin_id,
                    cycle,
                    files,
                    files_changed = ack.files_changed,
                    dry_run = ack.dry_run,
                    "Batch submitted"
                );
                metrics::record_cycle(&plugin_id, "submitted");
                Ok(CycleOutcome::Submitted(ack))
            }
            Err(e) => {
                error!(plugin_id = %plugin_id, cycle, files, error = %e, "Batch submission failed");
                metrics::record_cycle(&plugin_id, "failed");

                if matches!(e, ClientError::UnregisteredPlugin(_)) {
                    self.session = None;
                    self.state = RuntimeState::Started;
                }
                Err(RuntimeError::Update(e))
            }
        }
    }

    /// Run the `stop` hook and end the session
    ///
    /// Safe to call from any state and more than once; the hook runs at most
    /// once, and only if `start` was attempted. Failures are logged.
    pub async fn stop(&mut self) {
        if self.state == RuntimeState::Stopped {
            return;
        }

        let plugin_id = self.config.info.id().to_string();

        if self.start_attempted {
            if let Err(e) = guarded(Hook::Stop, self.plugin.stop()).await {
                error!(plugin_id = %plugin_id, error = %e, "Stop hook failed");
            }
        }

        if self.config.deregister_on_stop && self.session.is_some() {
            match self.client.deregister(&plugin_id).await {
                Ok(response) => {
                    debug!(plugin_id = %plugin_id, removed = response.removed, "Deregistered")
                }
                Err(e) => warn!(plugin_id = %plugin_id, error = %e, "Deregister failed"),
            }
        }

        self.session = None;
        self.state = RuntimeState::Stopped;
        info!(plugin_id = %plugin_id, "Plugin stopped");
    }

    /// Drive the whole lifecycle until done or shut down
    ///
    /// Start, register, one cycle immediately, then one per
    /// `update_interval` when set. `stop` runs on every exit path.
    pub async fn run(&mut self) -> Result<RunSummary, RuntimeError> {
        let result = self.drive().await;
        self.stop().await;

        match &result {
            Ok(summary) => info!(
                plugin_id = %self.config.info.id(),
                cycles = summary.cycles,
                submitted = summary.submitted,
                skipped = summary.skipped,
                failed = summary.failed,
                "Run finished"
            ),
            Err(e) => error!(plugin_id = %self.config.info.id(), error = %e, "Run aborted"),
        }
        result
    }

    async fn drive(&mut self) -> Result<RunSummary, RuntimeError> {
        let mut shutdown = self.shutdown_rx.clone();
        let mut summary = RunSummary::default();

        if *shutdown.borrow_and_update() {
            return Ok(summary);
        }

        self.start().await?;

        tokio::select! {
            result = self.register() => { summary.debug_mode = Some(result?); }
            _ = wait_for_shutdown(&mut shutdown) => return Ok(summary),
        }

        match self.cycle_or_shutdown(&mut shutdown).await {
            Some(result) => summary.record(result)?,
            None => return Ok(summary),
        }

        let Some(period) = self.config.update_interval else {
            return Ok(summary);
        };

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }

            match self.cycle_or_shutdown(&mut shutdown).await {
                Some(result) => summary.record(result)?,
                None => break,
            }
        }

        Ok(summary)
    }

    async fn cycle_or_shutdown(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Result<CycleOutcome, RuntimeError>> {
        tokio::select! {
            result = self.run_update_cycle() => Some(result),
            _ = wait_for_shutdown(shutdown) => None,
        }
    }

    fn expect_state(&self, op: &'static str, expected: RuntimeState) -> Result<(), RuntimeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RuntimeError::InvalidState {
                op,
                state: self.state,
            })
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can ask for shutdown any more
            std::future::pending::<()>().await;
        }
    }
}

/// Run a hook, turning both errors and panics into [`RuntimeError::Hook`]
async fn guarded<T>(
    hook: Hook,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, RuntimeError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RuntimeError::Hook {
            hook,
            source: e.into(),
        }),
        Err(panic) => Err(RuntimeError::Hook {
            hook,
            source: format!("hook panicked: {}", panic_message(panic.as_ref())).into(),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Plugin runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Operation not allowed in the current state
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: RuntimeState },

    /// Coordinator client could not be built
    #[error("client error: {0}")]
    Client(#[source] ClientError),

    /// A plugin hook failed or panicked
    #[error("{hook} hook failed: {source}")]
    Hook {
        hook: Hook,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Registration failed (after retries for transport errors)
    #[error("registration failed: {0}")]
    Registration(#[source] ClientError),

    /// Submitting a batch failed (after retries for transport errors)
    #[error("update failed: {0}")]
    Update(#[source] ClientError),
}

impl RuntimeError {
    /// Whether the run cannot continue
    ///
    /// A failing update hook or a rejected batch only costs one cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidState { .. } | Self::Client(_) | Self::Registration(_) => true,
            Self::Hook { hook, .. } => *hook == Hook::Start,
            Self::Update(e) => matches!(e, ClientError::UnregisteredPlugin(_) | ClientError::Init(_)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
