//! Error types for stratakv
//!
//! Provides a unified error type for all operations.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for stratakv operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt storage at {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("Invalid metadata snapshot: {0}")]
    Metadata(String),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Value collides with the reserved sentinel: {0}")]
    Sentinel(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Store is closed")]
    Closed,

    #[error("Storage directory was taken over by another session")]
    SessionConflict,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Invariant Violations
    // -------------------------------------------------------------------------
    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

/// Tag an `io::Error` with the physical file path it occurred on.
///
/// Usage: `file.read_exact(&mut buf).map_err(io_at(&path))?`
pub(crate) fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> StrataError + '_ {
    move |source| StrataError::IoAt {
        path: path.to_path_buf(),
        source,
    }
}

/// Build a `Corrupt` error for the given file.
pub(crate) fn corrupt(path: &Path, detail: impl Into<String>) -> StrataError {
    StrataError::Corrupt {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}
