//! Error types for threadvault.
//!
//! Library crates use [`ThreadvaultError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all threadvault operations.
#[derive(Debug, thiserror::Error)]
pub enum ThreadvaultError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Connection failure, timeout, or reset while talking to a remote.
    #[error("network error: {0}")]
    Network(String),

    /// Remote answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// Page fetched fine but holds no usable content.
    #[error("content error: {message}")]
    Content { message: String },

    /// Database or ledger error.
    #[error("storage error: {0}")]
    Storage(String),

    /// An embedded asset could not be fetched or saved.
    #[error("asset error: {0}")]
    Asset(String),

    /// AI metadata collaborator failed or answered with garbage.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Notification delivery failed.
    #[error("notification error: {0}")]
    Notification(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed JSON, bad identifier, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ThreadvaultError>;

/// How the pipeline treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt after a delay.
    Transient,
    /// The remote answered but the payload is unusable. Never retried.
    Content,
    /// Anything else: local I/O, storage, configuration.
    Fatal,
}

impl ThreadvaultError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a content error from any displayable message.
    pub fn content(msg: impl Into<String>) -> Self {
        Self::Content {
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

    /// Classify this error for retry decisions.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Network(_) | Self::Http { .. } => FailureClass::Transient,
            Self::Content { .. } | Self::Validation { .. } | Self::Conversion(_) => {
                FailureClass::Content
            }
            Self::Config { .. }
            | Self::Storage(_)
            | Self::Asset(_)
            | Self::Enrichment(_)
            | Self::Notification(_)
            | Self::Io { .. } => FailureClass::Fatal,
        }
    }

    /// True when a retry might succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}
