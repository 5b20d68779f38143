//! Crawler plugins and the runtime that hosts them
//!
//! A plugin implements [`CrawlerPlugin`]; a [`PluginRuntime`] drives it
//! through `start`, registration, update cycles and `stop`, talking to the
//! coordinator on its behalf.
//!
//! ```text
//! Created ──start──▶ Started ──register──▶ Registered ──cycle──┐
//!    │                  │                      │   ▲           │
//!    │                  │                      │   └───────────┘
//!    └──────────────────┴──────── stop ────────┴──────▶ Stopped
//! ```

pub mod config;
pub mod mirror;
pub mod runtime;
pub mod toolkit;

use async_trait::async_trait;

use crate::coordinator::{ClientError, CoordinatorClient};
use crate::protocol::{FileBatch, PluginInfo, ProblemList};

pub use config::{RuntimeConfig, RuntimeConfigError};
pub use mirror::DirectoryPlugin;
pub use runtime::{
    CycleOutcome, Hook, PluginRuntime, RunSummary, RuntimeError, RuntimeState, ShutdownHandle,
};

/// A crawler for one external data source
///
/// Hooks run strictly one after another. `start` acquires whatever the
/// plugin needs, `update` produces the full current snapshot of its files,
/// `stop` releases what `start` acquired.
#[async_trait]
pub trait CrawlerPlugin: Send {
    /// Acquire plugin resources
    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Produce this cycle's batch, or `None` when there is nothing to submit
    async fn update(&mut self, ctx: &UpdateContext<'_>) -> anyhow::Result<Option<FileBatch>>;

    /// Release plugin resources
    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What an update hook can see of its session
pub struct UpdateContext<'a> {
    pub(crate) client: &'a CoordinatorClient,
    pub(crate) info: &'a PluginInfo,
    pub(crate) debug_mode: bool,
    pub(crate) cycle: u64,
    pub(crate) limit: usize,
}

impl<'a> UpdateContext<'a> {
    /// Identity of the plugin
    pub fn info(&self) -> &PluginInfo {
        self.info
    }

    /// Mode assigned at registration
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// 1-based number of this cycle in the session
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// How many known problems to refresh this cycle
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Problem list the coordinator currently holds for this plugin
    pub async fn problem_list(&self) -> Result<ProblemList, ClientError> {
        self.client.problem_list(self.info.id()).await
    }
}
