//! Error types for Company Intel.
//!
//! Library crates use [`CompanyIntelError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Company Intel operations.
#[derive(Debug, thiserror::Error)]
pub enum CompanyIntelError {
    /// Configuration loading or validation error, including missing env wiring.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during crawl, discovery or a backend call.
    #[error("network error: {0}")]
    Network(String),

    /// HTML, JSON or front-matter parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Raw-document store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Embedding backend error (unreachable, bad response).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector index error (unreachable, rejected request).
    #[error("index error: {0}")]
    Index(String),

    /// Data-integrity violation such as a dense vector of the wrong dimension.
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CompanyIntelError>;

impl CompanyIntelError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create an integrity error from any displayable message.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity {
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
