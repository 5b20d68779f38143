//! Coordinator server for crawler plugins
//!
//! This module provides the central coordinator that plugins register with
//! and report file batches to, plus the client plugins use to reach it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           Coordinator Server             │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │         Plugin Registry            │  │
//! │  │  - Registration / debug policy     │  │
//! │  │  - Per-id update serialization     │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │          Batch Store               │  │
//! │  │  - Atomic batch apply              │  │
//! │  │  - Revisions                       │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │            REST API                │  │
//! │  │  POST /api/plugins/register        │  │
//! │  │  POST /api/plugins/update          │  │
//! │  │  POST /api/plugins/deregister      │  │
//! │  │  GET  /api/plugins/{id}/problemlist│  │
//! │  │  GET  /api/health, /metrics        │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use oi_archive::coordinator::{CoordinatorServer, CoordinatorConfig};
//!
//! let config = CoordinatorConfig::default();
//! let server = CoordinatorServer::new(config)?;
//! server.start().await?;
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod registry;
pub mod server;
pub mod service;

// Re-export main types
pub use client::{ClientConfig, ClientError, CoordinatorClient};
pub use config::CoordinatorConfig;
pub use registry::{DebugPolicy, PluginRegistry, RegistrationState, RegistryStats};
pub use server::{CoordinatorServer, ServerError};
pub use service::{Coordinator, CoordinatorError};
