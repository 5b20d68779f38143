//! Test fixtures for integration tests
//!
//! Scripted plugins and sample problem-set documents.

use async_trait::async_trait;
use oi_archive::plugin::toolkit::{choose_update_problems, known_problems, write_problem_files};
use oi_archive::plugin::{CrawlerPlugin, ShutdownHandle, UpdateContext};
use oi_archive::protocol::{FileBatch, Problem, ProblemList, ProblemListItem};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Sample `main.json` content
pub const SAMPLE_PROBLEM_JSON: &str =
    r#"{"time":1000,"memory":256,"title":"A+B Problem","judge":"normal","url":"https://example.org/p/1","description_type":"markdown"}"#;

/// What a scripted update hook does on one cycle
#[derive(Debug, Clone)]
pub enum Step {
    Submit(FileBatch),
    Nothing,
    Fail(&'static str),
    Panic,
    /// Request shutdown, then report nothing to submit
    Shutdown,
}

/// Plugin whose hooks follow a script and record what they saw
#[derive(Default)]
pub struct ScriptedPlugin {
    steps: VecDeque<Step>,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub seen_debug: Arc<Mutex<Vec<bool>>>,
    pub shutdown: Option<ShutdownHandle>,
}

impl ScriptedPlugin {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl CrawlerPlugin for ScriptedPlugin {
    async fn start(&mut self) -> anyhow::Result<()> {
        self.record("start");
        if self.fail_start {
            anyhow::bail!("login rejected");
        }
        Ok(())
    }

    async fn update(&mut self, ctx: &UpdateContext<'_>) -> anyhow::Result<Option<FileBatch>> {
        self.record(format!("update:{}", ctx.cycle()));
        self.seen_debug.lock().unwrap().push(ctx.debug_mode());

        match self.steps.pop_front().unwrap_or(Step::Nothing) {
            Step::Submit(batch) => Ok(Some(batch)),
            Step::Nothing => Ok(None),
            Step::Fail(reason) => anyhow::bail!(reason),
            Step::Panic => panic!("scraper hit an unexpected page layout"),
            Step::Shutdown => {
                if let Some(handle) = &self.shutdown {
                    handle.shutdown();
                }
                Ok(None)
            }
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.record("stop");
        if self.fail_stop {
            anyhow::bail!("session already closed");
        }
        Ok(())
    }
}

/// Crawler over a fixed in-memory problem set, using the toolkit the way a
/// real scraper would
pub struct ProblemSetPlugin {
    pub problems: Vec<(String, String)>,
    pub fetched: Arc<Mutex<Vec<String>>>,
}

impl ProblemSetPlugin {
    pub fn new(problems: &[(&str, &str)]) -> Self {
        Self {
            problems: problems
                .iter()
                .map(|(pid, title)| (pid.to_string(), title.to_string()))
                .collect(),
            fetched: Arc::default(),
        }
    }
}

#[async_trait]
impl CrawlerPlugin for ProblemSetPlugin {
    async fn update(&mut self, ctx: &UpdateContext<'_>) -> anyhow::Result<Option<FileBatch>> {
        let known = known_problems(&ctx.problem_list().await?);

        let mut list: ProblemList = self
            .problems
            .iter()
            .map(|(pid, title)| ProblemListItem::new(pid, title))
            .collect();
        let chosen = choose_update_problems(&list, &known, ctx.limit());

        for item in list.iter_mut().filter(|i| chosen.contains(&i.pid)) {
            self.fetched.lock().unwrap().push(item.pid.clone());
            item.data = Some(Problem {
                time: 1000,
                memory: 256,
                title: item.title.clone(),
                judge: "normal".to_string(),
                url: format!("https://example.org/p/{}", item.pid),
                description: format!("Statement of {}", item.title),
                description_type: "markdown".to_string(),
            });
        }

        let mut batch = FileBatch::new();
        write_problem_files(&mut batch, &list)?;
        Ok(Some(batch))
    }
}
