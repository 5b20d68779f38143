//! Integration tests module
//!
//! End-to-end tests for the plugin/coordinator protocol, including:
//! - Registration, updates and dry runs over HTTP
//! - The plugin lifecycle driven by `PluginRuntime`
//! - Failure injection on the coordinator side

pub mod client_errors;
pub mod fixtures;
pub mod runtime_test;
