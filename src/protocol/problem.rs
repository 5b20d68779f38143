//! Problem-set documents shared between plugins and the coordinator
//!
//! Plugins lay their scraped problems into a batch using these shapes; the
//! coordinator reads `problemlist.json` back to answer problem-list queries.

use serde::{Deserialize, Serialize};

/// Path of the problem list inside a plugin's namespace
pub const PROBLEM_LIST_PATH: &str = "problemlist.json";

/// One scraped problem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Time limit in milliseconds
    pub time: u32,

    /// Memory limit in MiB
    pub memory: u32,

    pub title: String,

    /// Judge type (e.g. `normal`, `spj`, `interactive`)
    pub judge: String,

    /// Original problem page
    pub url: String,

    /// Statement body, written to its own file rather than `main.json`
    #[serde(skip)]
    pub description: String,

    /// Format of the statement (`markdown`, `html`)
    pub description_type: String,
}

/// Entry of a problem list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemListItem {
    pub title: String,
    pub pid: String,

    /// Scraped details, `None` when the problem was not fetched this cycle
    #[serde(skip)]
    pub data: Option<Problem>,
}

impl ProblemListItem {
    pub fn new(pid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            pid: pid.into(),
            data: None,
        }
    }
}

/// Ordered problem list of one problem set
pub type ProblemList = Vec<ProblemListItem>;
