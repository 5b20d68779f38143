//! Prometheus metrics for the coordinator and plugin runtime
//!
//! This module provides metrics tracking for:
//! - Coordinator: registrations, update outcomes, applied files, apply latency
//! - Plugin runtime: update cycles and their outcomes
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all coordinator metrics
struct CoordinatorMetrics {
    registered_plugins: Gauge,
    registrations: CounterVec,
    updates: CounterVec,
    files_applied: Counter,
    apply_duration: Histogram,
}

/// Container for all plugin runtime metrics
struct RuntimeMetrics {
    cycles: CounterVec,
}

/// Global storage for coordinator metrics
static COORDINATOR_METRICS: OnceLock<CoordinatorMetrics> = OnceLock::new();

/// Global storage for runtime metrics
static RUNTIME_METRICS: OnceLock<RuntimeMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = oi_archive::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let coordinator = CoordinatorMetrics {
        registered_plugins: register_gauge!(
            "oi_archive_coordinator_registered_plugins",
            "Number of registered crawler plugins"
        )?,
        registrations: register_counter_vec!(
            "oi_archive_coordinator_registrations_total",
            "Total successful registrations by assigned mode",
            &["mode"]
        )?,
        updates: register_counter_vec!(
            "oi_archive_coordinator_updates_total",
            "Total update requests by result",
            &["result"]
        )?,
        files_applied: register_counter!(
            "oi_archive_coordinator_files_applied_total",
            "Total files accepted from update batches"
        )?,
        apply_duration: register_histogram!(
            "oi_archive_coordinator_apply_duration_seconds",
            "Time spent applying one batch in seconds",
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let runtime = RuntimeMetrics {
        cycles: register_counter_vec!(
            "oi_archive_plugin_update_cycles_total",
            "Total plugin update cycles by outcome",
            &["plugin", "outcome"]
        )?,
    };

    COORDINATOR_METRICS
        .set(coordinator)
        .map_err(|_| "Coordinator metrics already initialized")?;
    RUNTIME_METRICS
        .set(runtime)
        .map_err(|_| "Runtime metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    COORDINATOR_METRICS.get().is_some() && RUNTIME_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Set the number of registered plugins
pub fn set_registered_plugins(count: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.registered_plugins.set(count as f64);
    }
}

/// Record a successful registration
pub fn record_registration(debug_mode: bool) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        let mode = if debug_mode { "debug" } else { "production" };
        m.registrations.with_label_values(&[mode]).inc();
    }
}

/// Record the result of an update request
pub fn record_update(result: &str) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.updates.with_label_values(&[result]).inc();
    }
}

/// Record files accepted from a batch
pub fn record_files_applied(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.files_applied.inc_by(count as f64);
    }
}

/// Record how long one batch apply took
pub fn observe_apply_duration(duration_secs: f64) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.apply_duration.observe(duration_secs);
    }
}

/// Record one plugin update cycle
pub fn record_cycle(plugin: &str, outcome: &str) {
    if let Some(m) = RUNTIME_METRICS.get() {
        m.cycles.with_label_values(&[plugin, outcome]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
