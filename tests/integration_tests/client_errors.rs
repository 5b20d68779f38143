//! Error scenario tests
//!
//! A mock coordinator injects failures to check how the runtime classifies
//! and retries them:
//! 1. Transport failures and busy answers are retried
//! 2. Validation and unregistered answers are not
//! 3. Malformed responses are reported

use oi_archive::coordinator::{ClientConfig, ClientError, CoordinatorClient};
use oi_archive::plugin::{PluginRuntime, RuntimeConfig, RuntimeError};
use oi_archive::protocol::{ErrorCode, ErrorResponse, RegisterResponse, UpdateResponse};
use oi_archive::utils::retry::RetryConfig;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{ScriptedPlugin, Step};
use crate::common::{batch, info};

fn fast_config(server: &MockServer) -> RuntimeConfig {
    RuntimeConfig::new(info("loj"))
        .with_coordinator_url(server.uri())
        .with_timeout(Duration::from_secs(2))
        .with_register_retry(RetryConfig::with_delays(3, 5, 20))
        .with_update_retry(RetryConfig::with_delays(2, 5, 20))
}

fn error_body(code: ErrorCode, reason: &str) -> serde_json::Value {
    serde_json::to_value(ErrorResponse::new(code, reason)).unwrap()
}

async fn mount_register_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/plugins/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(RegisterResponse { debug_mode: false }))
        .mount(server)
        .await;
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_register_retries_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/register"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/plugins/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(RegisterResponse { debug_mode: true }))
        .expect(1)
        .mount(&server)
        .await;

    let mut runtime = PluginRuntime::new(fast_config(&server), ScriptedPlugin::new([])).unwrap();
    runtime.start().await.unwrap();

    assert!(runtime.register().await.unwrap());
    runtime.stop().await;
}

#[tokio::test]
async fn test_register_validation_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/register"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(error_body(ErrorCode::Validation, "plugin id is empty")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut runtime = PluginRuntime::new(fast_config(&server), ScriptedPlugin::new([])).unwrap();
    let err = runtime.run().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Registration(ClientError::Validation(_))));
}

#[tokio::test]
async fn test_register_gives_up_after_bound() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/register"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let mut runtime = PluginRuntime::new(fast_config(&server), ScriptedPlugin::new([])).unwrap();
    let err = runtime.run().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Registration(ClientError::Transport(_))));
}

#[tokio::test]
async fn test_register_timeout_is_transport() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/register"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(RegisterResponse { debug_mode: false })
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = fast_config(&server)
        .with_timeout(Duration::from_millis(100))
        .with_register_retry(RetryConfig::none());
    let mut runtime = PluginRuntime::new(config, ScriptedPlugin::new([])).unwrap();
    let err = runtime.run().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Registration(ClientError::Transport(_))));
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
async fn test_busy_update_is_retried() {
    let server = MockServer::start().await;
    mount_register_ok(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/update"))
        .respond_with(ResponseTemplate::new(409).set_body_json(error_body(ErrorCode::Busy, "in flight")))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/plugins/update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(UpdateResponse::applied(1, 1, false)))
        .expect(1)
        .mount(&server)
        .await;

    let plugin = ScriptedPlugin::new([Step::Submit(batch(&[("a", "1")]))]);
    let mut runtime = PluginRuntime::new(fast_config(&server), plugin).unwrap();
    let summary = runtime.run().await.unwrap();

    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.files_applied, 1);
}

#[tokio::test]
async fn test_unregistered_update_is_not_retried() {
    let server = MockServer::start().await;
    mount_register_ok(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/update"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(error_body(ErrorCode::UnregisteredPlugin, "plugin 'loj' is not registered")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let plugin = ScriptedPlugin::new([Step::Submit(batch(&[("a", "1")]))]);
    let mut runtime = PluginRuntime::new(fast_config(&server), plugin).unwrap();
    let err = runtime.run().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Update(ClientError::UnregisteredPlugin(_))));
}

#[tokio::test]
async fn test_rejected_batch_fails_only_the_cycle() {
    let server = MockServer::start().await;
    mount_register_ok(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/update"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(error_body(ErrorCode::Validation, "invalid path")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let plugin = ScriptedPlugin::new([Step::Submit(batch(&[("a//b", "1")]))]);
    let mut runtime = PluginRuntime::new(fast_config(&server), plugin).unwrap();
    let summary = runtime.run().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.submitted, 0);
}

#[tokio::test]
async fn test_negative_acknowledgement_is_an_error() {
    let server = MockServer::start().await;
    mount_register_ok(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/update"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ok": false, "reason": "store is read-only"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = CoordinatorClient::new(ClientConfig::new(server.uri())).unwrap();
    let err = client.update(&info("loj"), batch(&[("a", "1")])).await.unwrap_err();

    match err {
        ClientError::Rejected { code, reason } => {
            assert_eq!(code, ErrorCode::Internal);
            assert_eq!(reason, "store is read-only");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_response_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/register"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy login</html>"))
        .mount(&server)
        .await;

    let client = CoordinatorClient::new(ClientConfig::new(server.uri())).unwrap();
    let err = client.register(&info("loj")).await.unwrap_err();

    assert!(matches!(err, ClientError::InvalidResponse(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unknown_client_error_status_is_validation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/plugins/update"))
        .respond_with(ResponseTemplate::new(413).set_body_string("payload too large"))
        .mount(&server)
        .await;

    let client = CoordinatorClient::new(ClientConfig::new(server.uri())).unwrap();
    let err = client.update(&info("loj"), batch(&[("a", "1")])).await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
}
