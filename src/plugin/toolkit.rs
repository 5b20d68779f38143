//! Helpers for problem-set crawlers
//!
//! Lay scraped problems into a [`FileBatch`] and pick which known problems to
//! refresh on a cycle.

use base64::{engine::general_purpose::URL_SAFE as BASE64_URL, Engine};
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::protocol::{FileBatch, ProblemList, ValidationError, PROBLEM_LIST_PATH};

/// Toolkit errors
#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("batch error: {0}")]
    Batch(#[from] ValidationError),
}

/// Write `problemlist.json`
pub fn write_problem_list(batch: &mut FileBatch, list: &ProblemList) -> Result<(), ToolkitError> {
    let json = serde_json::to_string(list)?;
    batch.insert(PROBLEM_LIST_PATH, json)?;
    Ok(())
}

/// Write the list plus `{pid}/main.json` and `{pid}/description.md` for every
/// problem that carries scraped data
///
/// Problems without data keep whatever the coordinator already stores.
pub fn write_problem_files(batch: &mut FileBatch, list: &ProblemList) -> Result<(), ToolkitError> {
    write_problem_list(batch, list)?;

    for item in list {
        let Some(problem) = &item.data else {
            continue;
        };
        batch.insert(format!("{}/main.json", item.pid), serde_json::to_string(problem)?)?;
        batch.insert(
            format!("{}/description.md", item.pid),
            problem.description.clone(),
        )?;
    }
    Ok(())
}

/// Store a downloaded image and return the link to put in the statement
///
/// The file is named after the source URL, so the same image referenced twice
/// lands once. The link is served under `/source/`.
pub fn write_image(
    batch: &mut FileBatch,
    prefix: &str,
    source_url: &str,
    bytes: Vec<u8>,
) -> Result<String, ToolkitError> {
    let mut name = BASE64_URL.encode(source_url);
    if name.len() > 200 {
        name = format!("{:x}", Sha256::digest(name.as_bytes()));
    }

    let path = match file_extension(source_url) {
        Some(ext) => format!("{prefix}{name}.{ext}"),
        None => format!("{prefix}{name}"),
    };
    if !batch.contains(&path) {
        batch.insert(path.clone(), bytes)?;
    }
    Ok(format!("/source/{path}"))
}

fn file_extension(url: &str) -> Option<&str> {
    let file = url.split(['?', '#']).next()?.rsplit('/').next()?;
    let (stem, ext) = file.rsplit_once('.')?;
    let valid = !stem.is_empty()
        && (1..=5).contains(&ext.len())
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}

/// Index a stored list by pid
pub fn known_problems(list: &ProblemList) -> HashMap<String, String> {
    list.iter()
        .map(|item| (item.pid.clone(), item.title.clone()))
        .collect()
}

/// Pick the problems to fetch this cycle
///
/// Every new or retitled problem is chosen; the rest of `limit` is filled
/// with randomly picked known problems. A `limit` of zero chooses nothing.
pub fn choose_update_problems(
    current: &ProblemList,
    known: &HashMap<String, String>,
    limit: usize,
) -> HashSet<String> {
    let mut chosen = HashSet::new();
    if limit == 0 || current.is_empty() {
        return chosen;
    }

    let mut unchanged = Vec::new();
    for item in current {
        match known.get(&item.pid) {
            Some(title) if *title == item.title => unchanged.push(item.pid.as_str()),
            _ => {
                chosen.insert(item.pid.clone());
            }
        }
    }

    let remaining = limit.min(current.len()).saturating_sub(chosen.len());
    let mut rng = rand::thread_rng();
    for pid in unchanged.choose_multiple(&mut rng, remaining) {
        chosen.insert((*pid).to_string());
    }
    chosen
}
