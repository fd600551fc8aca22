//! Error types for the attribute store.

use crate::types::ItemPath;
use std::path::Path;
use thiserror::Error;

/// Boxed cause carried by backend failures.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the attribute store and its backends.
///
/// The facade never swallows or retries: every backend error reaches the caller
/// unchanged, and the caller decides whether a failed attribute write fails the
/// surrounding request.
#[derive(Debug, Error)]
pub enum AttrError {
    #[error("Invalid attribute name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid item path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Attribute not found: {name} on /{path}")]
    NotFound { path: String, name: String },

    #[error("Target item does not exist: /{path}")]
    TargetMissing { path: String },

    #[error("{context}: {source}")]
    BackendIo {
        context: String,
        #[source]
        source: BoxedCause,
    },

    #[error("Operation not supported by the {backend} backend: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AttrError {
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AttrError::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        AttrError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn target_missing(path: &ItemPath) -> Self {
        AttrError::TargetMissing {
            path: path.segments().join("/"),
        }
    }

    /// Wrap a filesystem failure, naming the operation and the path it touched.
    pub fn io(operation: &str, path: &Path, source: std::io::Error) -> Self {
        AttrError::BackendIo {
            context: format!("Failed to {} {}", operation, path.display()),
            source: Box::new(source),
        }
    }

    /// Wrap any other backend failure (HTTP, runtime join, timeout).
    pub fn backend(context: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        AttrError::BackendIo {
            context: context.into(),
            source: source.into(),
        }
    }

    /// True for the `NotFound` variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AttrError::NotFound { .. })
    }
}

impl From<config::ConfigError> for AttrError {
    fn from(err: config::ConfigError) -> Self {
        AttrError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AttrError>;
