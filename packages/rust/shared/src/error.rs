//! Error types for textsift.
//!
//! Library crates use [`TextsiftError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all textsift operations.
#[derive(Debug, thiserror::Error)]
pub enum TextsiftError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A caller passed an argument outside its valid range (e.g. batch size 0).
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// An object was used in a state that does not allow the operation,
    /// such as closing a timer section when none is open.
    #[error("state violation: {message}")]
    State { message: String },

    /// A pipeline stage failed while processing a batch.
    #[error("stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    /// Data validation error (ragged table, malformed record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Network/HTTP error while talking to the index or dashboard service.
    #[error("network error: {0}")]
    Network(String),

    /// The index or dashboard service rejected a request.
    #[error("sink error: {0}")]
    Sink(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TextsiftError>;

impl TextsiftError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-argument error from any displayable message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: msg.into(),
        }
    }

    /// Create a state-violation error from any displayable message.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State {
            message: msg.into(),
        }
    }

    /// Create a stage execution error attributed to `stage`.
    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
