//! Unified error handling for the oi-archive crate
//!
//! Each layer keeps its own error type; this module wraps them in a single
//! `Error` enum for code that crosses layer boundaries (the binary, config
//! loading, tests).
//!
//! # Architecture
//!
//! - [`ArchiveErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use oi_archive::error::{ArchiveErrorTrait, Error};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying ({}): {err}", err.category());
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::coordinator::{ClientError, CoordinatorError};
pub use crate::plugin::RuntimeError;
pub use crate::protocol::ValidationError;
pub use crate::store::StoreError;

/// Common trait for oi-archive error types
pub trait ArchiveErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Coordinator unreachable, timeouts, busy answers
    Network,
    /// Malformed identities or batches
    Validation,
    /// Backing store and I/O errors
    Storage,
    /// Plugin hooks and lifecycle misuse
    Plugin,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Plugin => "plugin",
            Self::Config => "config",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Unified error type for the oi-archive crate
#[derive(Error, Debug)]
pub enum Error {
    /// Identity or batch rejected before reaching the coordinator
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Backing store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Coordinator-side request failures
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Plugin-side protocol failures
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Plugin lifecycle failures
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ArchiveErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Store(e) => matches!(e, StoreError::Io(_) | StoreError::Unavailable(_)),
            Self::Coordinator(e) => matches!(
                e,
                CoordinatorError::Busy(_)
                    | CoordinatorError::CapacityExceeded { .. }
                    | CoordinatorError::Store(_)
            ),
            Self::Client(e) => e.is_retryable(),
            Self::Runtime(e) => !e.is_fatal(),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Coordinator(e) => match e {
                CoordinatorError::Validation(_) => ErrorCategory::Validation,
                CoordinatorError::Store(_) => ErrorCategory::Storage,
                _ => ErrorCategory::Network,
            },
            Self::Client(e) => match e {
                ClientError::Validation(_) => ErrorCategory::Validation,
                ClientError::Init(_) => ErrorCategory::Config,
                _ => ErrorCategory::Network,
            },
            Self::Runtime(e) => match e {
                RuntimeError::Registration(_) | RuntimeError::Update(_) => ErrorCategory::Network,
                RuntimeError::Client(_) => ErrorCategory::Config,
                _ => ErrorCategory::Plugin,
            },
            Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: Some(err.into()),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
