//! Error types for Plait.
//!
//! This module defines the error types used throughout Plait, providing
//! rich error information for debugging and user feedback.
//!
//! Per-host task failure is deliberately *not* an error: one host failing
//! must never interrupt iteration for the others, so failure travels as
//! state (see [`FailState`](crate::executor::FailState)). `Error` is
//! reserved for structural misuse and malformed input.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Plait operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Plait.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Playbook Errors
    // ========================================================================
    /// Error parsing a playbook file.
    #[error("Failed to parse playbook '{path}': {message}")]
    PlaybookParse {
        /// Path to the playbook file
        path: PathBuf,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error validating playbook structure.
    #[error("Playbook validation failed: {0}")]
    PlaybookValidation(String),

    // ========================================================================
    // Iteration Errors
    // ========================================================================
    /// Host not known to the iterator.
    #[error("Host '{0}' is not part of this play iteration")]
    HostNotFound(String),

    // ========================================================================
    // Include Errors
    // ========================================================================
    /// An include target could not be resolved at compile time.
    #[error("Included task file '{0}' not found")]
    IncludeNotFound(String),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON conversion error.
    #[error("JSON conversion error: {0}")]
    JsonConvert(#[from] serde_json::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new playbook parse error.
    pub fn playbook_parse(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::PlaybookParse {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::PlaybookValidation(message.into())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_not_found_display() {
        let err = Error::HostNotFound("web01".to_string());
        assert_eq!(
            err.to_string(),
            "Host 'web01' is not part of this play iteration"
        );
    }

    #[test]
    fn test_error_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        let err = res.context("loading tasks file").unwrap_err();
        assert!(err.to_string().contains("loading tasks file"));
    }
}
