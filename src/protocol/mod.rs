//! Wire types shared by the coordinator and plugin runtime
//!
//! Both sides of the Register/Update protocol speak these types as JSON.
//!
//! ```text
//! POST /api/plugins/register   RegisterRequest   -> RegisterResponse
//! POST /api/plugins/update     UpdateRequest     -> UpdateResponse
//! POST /api/plugins/deregister DeregisterRequest -> DeregisterResponse
//! (any failure)                                  -> ErrorResponse
//! ```

pub mod problem;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use problem::{Problem, ProblemList, ProblemListItem, PROBLEM_LIST_PATH};
pub use validate::{validate_batch, validate_id, validate_info, BatchLimits, ValidationError};

/// Default coordinator listen address
pub const DEFAULT_COORDINATOR_ADDR: &str = "127.0.0.1:27381";

// ============================================================================
// Plugin Identity
// ============================================================================

/// Identity of one crawler plugin
///
/// Chosen by the operator, immutable for the lifetime of the process and
/// sent with every request as the correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginInfo {
    id: String,
    name: String,
}

impl PluginInfo {
    /// Create a plugin identity
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Stable plugin identifier (e.g. `loj`)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable problem-set name (e.g. `LibreOJ`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check the identity against the coordinator's rules
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_info(self)
    }
}

impl fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

// ============================================================================
// File Content
// ============================================================================

/// Content of one file in a batch
///
/// Text travels as a plain JSON string. Binary content (problem images,
/// attachments) travels as `{"base64": "..."}` so the batch stays a JSON map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContent {
    Text(String),
    Binary {
        #[serde(with = "base64_bytes")]
        base64: Vec<u8>,
    },
}

impl FileContent {
    /// Wrap raw bytes, keeping valid UTF-8 as text
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Binary {
                base64: e.into_bytes(),
            },
        }
    }

    /// Raw bytes of the content
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary { base64 } => base64,
        }
    }

    /// Text content, `None` for binary
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary { .. } => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary { .. })
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary { base64: bytes }
    }
}

impl From<&[u8]> for FileContent {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary {
            base64: bytes.to_vec(),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// File Batch
// ============================================================================

/// Full snapshot of the files a plugin wants committed in one update cycle
///
/// Keys are virtual paths inside the plugin's namespace. The map is ordered so
/// that serialization and store application are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileBatch {
    files: BTreeMap<String, FileContent>,
}

impl FileBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, refusing to overwrite a path already in the batch
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        content: impl Into<FileContent>,
    ) -> Result<(), ValidationError> {
        let path = path.into();
        if self.files.contains_key(&path) {
            return Err(ValidationError::DuplicatePath(path));
        }
        self.files.insert(path, content.into());
        Ok(())
    }

    /// Content stored for a path
    pub fn get(&self, path: &str) -> Option<&FileContent> {
        self.files.get(path)
    }

    /// Text content stored for a path, `None` when absent or binary
    pub fn text(&self, path: &str) -> Option<&str> {
        self.files.get(path).and_then(FileContent::as_text)
    }

    /// Check whether the batch holds a path
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if the batch has no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total content size in bytes
    pub fn total_bytes(&self) -> usize {
        self.files.values().map(FileContent::len).sum()
    }

    /// Iterate over `(path, content)` pairs in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileContent)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c))
    }

    /// Iterate over paths in order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

impl<C: Into<FileContent>> FromIterator<(String, C)> for FileBatch {
    fn from_iter<I: IntoIterator<Item = (String, C)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().map(|(p, c)| (p, c.into())).collect(),
        }
    }
}

impl IntoIterator for FileBatch {
    type Item = (String, FileContent);
    type IntoIter = std::collections::btree_map::IntoIter<String, FileContent>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

// ============================================================================
// Register
// ============================================================================

/// Registration handshake request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub info: PluginInfo,
}

/// Registration handshake response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Whether updates from this session are dry runs
    pub debug_mode: bool,
}

// ============================================================================
// Update
// ============================================================================

/// Submission of one file batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub info: PluginInfo,
    #[serde(default)]
    pub file: FileBatch,
}

/// Acknowledgement of one file batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub ok: bool,
    #[serde(default)]
    pub reason: String,
    /// Files accepted from the batch
    #[serde(default)]
    pub files_applied: usize,
    /// Files whose stored content actually changed
    #[serde(default)]
    pub files_changed: usize,
    /// True when the batch was validated but not persisted
    #[serde(default)]
    pub dry_run: bool,
}

impl UpdateResponse {
    /// Successful acknowledgement
    pub fn applied(files_applied: usize, files_changed: usize, dry_run: bool) -> Self {
        Self {
            ok: true,
            reason: String::new(),
            files_applied,
            files_changed,
            dry_run,
        }
    }
}

// ============================================================================
// Deregister
// ============================================================================

/// Explicit removal of a registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterRequest {
    pub id: String,
}

/// Result of a deregistration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeregisterResponse {
    pub removed: bool,
}

/// Operator request to change the debug policy of one plugin id
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DebugModeRequest {
    pub enabled: bool,
}

// ============================================================================
// Errors on the wire
// ============================================================================

/// Machine-readable failure class carried in error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed identity or batch
    Validation,
    /// Request for an id with no registration
    UnregisteredPlugin,
    /// Another update for the same id is in flight
    Busy,
    /// Registry is full
    CapacityExceeded,
    /// Backing store failed, nothing was applied
    Store,
    /// Anything else
    Internal,
}

impl ErrorCode {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::UnregisteredPlugin => "unregistered_plugin",
            Self::Busy => "busy",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::Store => "store",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of every non-2xx coordinator response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub code: ErrorCode,
    pub reason: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            code,
            reason: reason.into(),
        }
    }
}
