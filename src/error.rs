// src/error.rs

//! Unified error handling for the reconciler.
//!
//! Per-record problems (a malformed source entry, a corrupt score file) are
//! classified into outcome enums by the pipeline and never abort a batch.
//! The variants below exist so those classifications carry a readable reason,
//! and so setup failures can still be propagated with `?`.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Filesystem watcher could not be created or attached
    #[cfg(feature = "native-watch")]
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A source entry or raw record could not be interpreted
    #[error("Malformed input in {context}: {message}")]
    MalformedInput { context: String, message: String },

    /// An expected file is absent
    #[error("Missing file: {}", .0.display())]
    MissingFile(PathBuf),

    /// A nested field needed for an update is absent or has the wrong shape
    #[error("Partial data for field '{field}': {message}")]
    PartialData { field: String, message: String },

    /// The external report builder failed or timed out
    #[error("External step failed: {0}")]
    ExternalFailure(String),

    /// A persisted score or aggregate file could not be parsed
    #[error("Corrupt persisted file {}: {message}", path.display())]
    CorruptPersisted { path: PathBuf, message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a malformed input error with context.
    pub fn malformed(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::MalformedInput {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a partial data error for a field path.
    pub fn partial(field: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::PartialData {
            field: field.into(),
            message: message.to_string(),
        }
    }

    /// Create an external failure error.
    pub fn external(message: impl fmt::Display) -> Self {
        Self::ExternalFailure(message.to_string())
    }

    /// Create a corrupt persisted file error.
    pub fn corrupt(path: impl AsRef<Path>, message: impl fmt::Display) -> Self {
        Self::CorruptPersisted {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }
}
