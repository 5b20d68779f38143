//! Plugin runtime lifecycle tests
//!
//! Runs real plugins against a live coordinator:
//! 1. Single-shot and scheduled runs
//! 2. Hook failures and panics
//! 3. Session handling (debug mode, lost registration, deregistration)
//! 4. Retries of store failures

use oi_archive::coordinator::{ClientError, CoordinatorConfig};
use oi_archive::plugin::{
    CycleOutcome, Hook, PluginRuntime, RuntimeConfig, RuntimeError, RuntimeState,
};
use oi_archive::protocol::PROBLEM_LIST_PATH;
use oi_archive::store::{BatchStore, StoreConfig};
use oi_archive::utils::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;

use super::fixtures::{ProblemSetPlugin, ScriptedPlugin, Step};
use crate::common::{
    batch, info, memory_config, spawn_coordinator, spawn_with_store, FailingStore,
    TestCoordinator,
};

fn runtime_config(coordinator: &TestCoordinator, id: &str) -> RuntimeConfig {
    RuntimeConfig::new(info(id))
        .with_coordinator_url(&coordinator.url)
        .with_timeout(Duration::from_secs(5))
        .with_register_retry(RetryConfig::with_delays(2, 10, 50))
        .with_update_retry(RetryConfig::with_delays(3, 10, 50))
}

fn calls(plugin: &ScriptedPlugin) -> Arc<std::sync::Mutex<Vec<String>>> {
    plugin.calls()
}

// ============================================================================
// Runs
// ============================================================================

#[tokio::test]
async fn test_single_shot_run() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let plugin = ScriptedPlugin::new([Step::Submit(batch(&[("1/main.json", "{}")]))]);
    let log = calls(&plugin);

    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "loj"), plugin).unwrap();
    let summary = runtime.run().await.unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.files_applied, 1);
    assert_eq!(summary.debug_mode, Some(false));
    assert_eq!(*log.lock().unwrap(), vec!["start", "update:1", "stop"]);
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert_eq!(
        coordinator.store.get_text("loj", "1/main.json").unwrap().as_deref(),
        Some("{}")
    );
}

#[tokio::test]
async fn test_stepwise_lifecycle() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let plugin = ScriptedPlugin::new([
        Step::Nothing,
        Step::Submit(batch(&[("a.md", "a")])),
    ]);
    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "loj"), plugin).unwrap();

    runtime.start().await.unwrap();
    assert_eq!(runtime.state(), RuntimeState::Started);
    assert!(!coordinator.coordinator.registry().is_registered("loj").await);

    assert!(!runtime.register().await.unwrap());
    assert_eq!(runtime.state(), RuntimeState::Registered);
    assert!(runtime.registered_at().is_some());

    assert_eq!(runtime.run_update_cycle().await.unwrap(), CycleOutcome::Skipped);
    assert!(matches!(
        runtime.run_update_cycle().await.unwrap(),
        CycleOutcome::Submitted(ack) if ack.files_applied == 1
    ));

    runtime.stop().await;
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert!(matches!(
        runtime.run_update_cycle().await,
        Err(RuntimeError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_scheduled_run_survives_hook_failures() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let mut plugin = ScriptedPlugin::new([
        Step::Fail("page layout changed"),
        Step::Panic,
        Step::Submit(batch(&[("1/main.json", "{}")])),
        Step::Shutdown,
    ]);
    let log = calls(&plugin);

    let config = runtime_config(&coordinator, "loj").with_update_interval(Duration::from_millis(20));
    let mut runtime = PluginRuntime::new(config, ScriptedPlugin::default()).unwrap();
    plugin.shutdown = Some(runtime.shutdown_handle());
    *runtime.plugin_mut() = plugin;

    let summary = runtime.run().await.unwrap();

    assert_eq!(summary.cycles, 4);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start", "update:1", "update:2", "update:3", "update:4", "stop"]
    );
}

#[tokio::test]
async fn test_external_shutdown_stops_scheduled_run() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let plugin = ScriptedPlugin::new([]);
    let log = calls(&plugin);

    let config = runtime_config(&coordinator, "loj").with_update_interval(Duration::from_secs(3600));
    let mut runtime = PluginRuntime::new(config, plugin).unwrap();

    let handle = runtime.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown();
    });

    let summary = tokio::time::timeout(Duration::from_secs(5), runtime.run())
        .await
        .expect("run should stop on shutdown")
        .unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("stop"));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_start_failure_never_registers() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let mut plugin = ScriptedPlugin::new([]);
    plugin.fail_start = true;
    let log = calls(&plugin);

    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "loj"), plugin).unwrap();
    let err = runtime.run().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Hook { hook: Hook::Start, .. }));
    assert_eq!(*log.lock().unwrap(), vec!["start", "stop"]);
    assert!(!coordinator.coordinator.registry().is_registered("loj").await);
}

#[tokio::test]
async fn test_invalid_identity_is_not_retried() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let plugin = ScriptedPlugin::new([]);
    let log = calls(&plugin);

    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "bad id"), plugin).unwrap();
    let err = runtime.run().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Registration(ClientError::Validation(_))));
    assert!(err.is_fatal());
    assert_eq!(*log.lock().unwrap(), vec!["start", "stop"]);
}

#[tokio::test]
async fn test_unreachable_coordinator_fails_after_retries() {
    // Bind then drop so the port is known to be closed
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut plugin = ScriptedPlugin::new([]);
    plugin.fail_stop = true;
    let log = calls(&plugin);

    let config = RuntimeConfig::new(info("loj"))
        .with_coordinator_url(format!("http://127.0.0.1:{port}"))
        .with_register_retry(RetryConfig::with_delays(2, 5, 10));
    let mut runtime = PluginRuntime::new(config, plugin).unwrap();

    let err = runtime.run().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Registration(ClientError::Transport(_))));
    // A failing stop hook is logged, not returned
    assert_eq!(*log.lock().unwrap(), vec!["start", "stop"]);
    assert_eq!(runtime.state(), RuntimeState::Stopped);
}

#[tokio::test]
async fn test_lost_registration_requires_reregistering() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let plugin = ScriptedPlugin::new([
        Step::Submit(batch(&[("a", "1")])),
        Step::Submit(batch(&[("a", "2")])),
    ]);
    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "loj"), plugin).unwrap();

    runtime.start().await.unwrap();
    runtime.register().await.unwrap();
    coordinator.coordinator.deregister("loj").await.unwrap();

    let err = runtime.run_update_cycle().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Update(ClientError::UnregisteredPlugin(_))));
    assert!(err.is_fatal());
    assert_eq!(runtime.state(), RuntimeState::Started);
    assert!(coordinator.store.get("loj", "a").unwrap().is_none());

    runtime.register().await.unwrap();
    runtime.run_update_cycle().await.unwrap();
    assert_eq!(coordinator.store.get_text("loj", "a").unwrap().as_deref(), Some("2"));

    runtime.stop().await;
}

#[tokio::test]
async fn test_unregistered_update_aborts_scheduled_run() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let plugin = ScriptedPlugin::new([Step::Nothing, Step::Submit(batch(&[("a", "1")]))]);
    let log = calls(&plugin);

    let config = runtime_config(&coordinator, "loj").with_update_interval(Duration::from_millis(200));
    let mut runtime = PluginRuntime::new(config, plugin).unwrap();

    let inner = Arc::clone(&coordinator.coordinator);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        inner.deregister("loj").await.unwrap();
    });

    let err = runtime.run().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Update(ClientError::UnregisteredPlugin(_))));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start", "update:1", "update:2", "stop"]
    );
}

#[tokio::test]
async fn test_store_failures_are_retried() {
    let store = Arc::new(FailingStore::new(2));
    let coordinator = spawn_with_store(memory_config(), store.clone()).await;
    let plugin = ScriptedPlugin::new([Step::Submit(batch(&[("a", "1")]))]);

    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "loj"), plugin).unwrap();
    let summary = runtime.run().await.unwrap();

    assert_eq!(summary.submitted, 1);
    assert_eq!(store.applies(), 3);
    assert_eq!(store.get_text("loj", "a").unwrap().as_deref(), Some("1"));
}

#[tokio::test]
async fn test_exhausted_store_retries_fail_the_cycle_only() {
    let store = Arc::new(FailingStore::new(10));
    let coordinator = spawn_with_store(memory_config(), store.clone()).await;
    let plugin = ScriptedPlugin::new([Step::Submit(batch(&[("a", "1")]))]);

    let config = runtime_config(&coordinator, "loj").with_update_retry(RetryConfig::with_delays(1, 5, 10));
    let mut runtime = PluginRuntime::new(config, plugin).unwrap();
    let summary = runtime.run().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.submitted, 0);
    assert_eq!(store.applies(), 2);
    assert!(store.get("loj", "a").unwrap().is_none());
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_debug_mode_reaches_the_hook() {
    let config = CoordinatorConfig::builder()
        .store(StoreConfig::Memory)
        .debug_plugin("sandbox")
        .build()
        .unwrap();
    let coordinator = spawn_coordinator(config).await;
    let plugin = ScriptedPlugin::new([Step::Submit(batch(&[("a", "1")]))]);
    let seen = Arc::clone(&plugin.seen_debug);

    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "sandbox"), plugin).unwrap();
    let summary = runtime.run().await.unwrap();

    assert_eq!(summary.debug_mode, Some(true));
    assert_eq!(summary.submitted, 1);
    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert!(coordinator.store.get("sandbox", "a").unwrap().is_none());
}

#[tokio::test]
async fn test_session_keeps_its_registered_mode() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let plugin = ScriptedPlugin::new([Step::Submit(batch(&[("a", "1")]))]);
    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "loj"), plugin).unwrap();

    runtime.start().await.unwrap();
    assert!(!runtime.register().await.unwrap());

    // Takes effect at the next registration only
    coordinator.coordinator.set_debug("loj", true).await.unwrap();

    let outcome = runtime.run_update_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Submitted(ack) if !ack.dry_run));
    assert_eq!(runtime.debug_mode(), Some(false));
    assert_eq!(coordinator.store.get_text("loj", "a").unwrap().as_deref(), Some("1"));

    runtime.stop().await;
}

#[tokio::test]
async fn test_deregister_on_stop() {
    let coordinator = spawn_coordinator(memory_config()).await;
    let plugin = ScriptedPlugin::new([Step::Nothing]);

    let config = runtime_config(&coordinator, "loj").with_deregister_on_stop(true);
    let mut runtime = PluginRuntime::new(config, plugin).unwrap();
    runtime.run().await.unwrap();

    assert!(!coordinator.coordinator.registry().is_registered("loj").await);
}

#[tokio::test]
async fn test_problem_set_plugin_incremental_updates() {
    let coordinator = spawn_coordinator(memory_config()).await;

    let first = ProblemSetPlugin::new(&[("1000", "A+B"), ("1001", "Sorting")]);
    let fetched = Arc::clone(&first.fetched);
    let mut runtime = PluginRuntime::new(runtime_config(&coordinator, "loj"), first).unwrap();
    runtime.run().await.unwrap();

    assert_eq!(fetched.lock().unwrap().len(), 2);
    assert!(coordinator.store.get("loj", "1001/description.md").unwrap().is_some());
    assert!(coordinator.store.get("loj", PROBLEM_LIST_PATH).unwrap().is_some());

    // Second run: one new problem, one retitled, limit leaves no room for refreshes
    let second = ProblemSetPlugin::new(&[("1000", "A+B"), ("1001", "Sorting II"), ("1002", "Graphs")]);
    let fetched = Arc::clone(&second.fetched);
    let config = runtime_config(&coordinator, "loj").with_update_limit(2);
    let mut runtime = PluginRuntime::new(config, second).unwrap();
    runtime.run().await.unwrap();

    let mut fetched = fetched.lock().unwrap().clone();
    fetched.sort();
    assert_eq!(fetched, vec!["1001", "1002"]);

    let list = coordinator.coordinator.problem_list("loj").await.unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(list[1].title, "Sorting II");
}
