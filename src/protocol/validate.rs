//! Validation rules for plugin identities and file batches

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

use super::{FileBatch, PluginInfo};

/// Longest accepted plugin id
pub const MAX_ID_LEN: usize = 64;

/// Longest accepted plugin name
pub const MAX_NAME_LEN: usize = 256;

/// Longest accepted path inside a batch
pub const MAX_PATH_LEN: usize = 1024;

/// Reasons a plugin identity or batch is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("plugin id is empty")]
    EmptyId,

    #[error("plugin id '{id}' is malformed: {reason}")]
    MalformedId { id: String, reason: String },

    #[error("plugin name is invalid: {0}")]
    InvalidName(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("duplicate path in batch: {0}")]
    DuplicatePath(String),

    #[error("batch has {count} files, limit is {max}")]
    TooManyFiles { count: usize, max: usize },

    #[error("batch is {bytes} bytes, limit is {max}")]
    TooLarge { bytes: usize, max: usize },
}

/// Size limits enforced on incoming batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    pub max_files: usize,
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_files: 50_000,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

fn id_pattern() -> &'static Regex {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid regex pattern"))
}

/// Validate a plugin id
pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::MalformedId {
            id: id.to_string(),
            reason: format!("longer than {MAX_ID_LEN} characters"),
        });
    }
    if !id_pattern().is_match(id) {
        return Err(ValidationError::MalformedId {
            id: id.to_string(),
            reason: "only ASCII letters, digits, '-' and '_' are allowed".to_string(),
        });
    }
    Ok(())
}

/// Validate a full plugin identity
pub fn validate_info(info: &PluginInfo) -> Result<(), ValidationError> {
    validate_id(info.id())?;

    let name = info.name().trim();
    if name.is_empty() {
        return Err(ValidationError::InvalidName("name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::InvalidName(format!(
            "longer than {MAX_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

/// Validate one path of a batch
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(invalid("path too long"));
    }
    if path.contains('\0') {
        return Err(invalid("contains NUL byte"));
    }
    if path.starts_with('/') {
        return Err(invalid("must be relative to the plugin namespace"));
    }
    if path.ends_with('/') {
        return Err(invalid("names a directory"));
    }

    // Only one spelling per file, so a batch cannot name the same file twice
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty path segment")),
            "." => return Err(invalid("current directory segment")),
            ".." => return Err(invalid("parent directory segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Validate every path of a batch and its overall size
pub fn validate_batch(batch: &FileBatch, limits: &BatchLimits) -> Result<(), ValidationError> {
    if batch.len() > limits.max_files {
        return Err(ValidationError::TooManyFiles {
            count: batch.len(),
            max: limits.max_files,
        });
    }

    let bytes = batch.total_bytes();
    if bytes > limits.max_bytes {
        return Err(ValidationError::TooLarge {
            bytes,
            max: limits.max_bytes,
        });
    }

    batch.paths().try_for_each(validate_path)
}
