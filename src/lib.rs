//! oi-archive - problem-set archive fed by crawler plugins
//!
//! Crawler plugins scrape online-judge problem sets and push them as file
//! batches to a central coordinator, which registers each plugin, decides
//! whether it runs in debug (dry-run) or production mode, and persists
//! accepted batches.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Wire types shared by plugins and the coordinator
//! - [`coordinator`] - Registration, update handling, HTTP server and client
//! - [`store`] - Backing stores for applied batches (memory, SQLite)
//! - [`plugin`] - Plugin trait, lifecycle runtime and crawler helpers
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Retry and formatting helpers
//!
//! # Example
//!
//! ```no_run
//! use oi_archive::plugin::{DirectoryPlugin, PluginRuntime, RuntimeConfig};
//! use oi_archive::protocol::PluginInfo;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RuntimeConfig::new(PluginInfo::new("loj", "LibreOJ"));
//!     let mut runtime = PluginRuntime::new(config, DirectoryPlugin::new("data/loj"))?;
//!     let summary = runtime.run().await?;
//!     println!("{} files applied", summary.files_applied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod protocol;
pub mod store;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{CoordinatorClient, CoordinatorConfig, CoordinatorServer};
    pub use crate::error::{ArchiveErrorTrait, Error, ErrorCategory, Result};
    pub use crate::plugin::{CrawlerPlugin, PluginRuntime, RuntimeConfig, UpdateContext};
    pub use crate::protocol::{FileBatch, FileContent, PluginInfo, ProblemList};
}

// Direct re-exports for convenience
pub use protocol::{FileBatch, FileContent, PluginInfo};
