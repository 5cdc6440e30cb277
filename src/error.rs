//! Error handling for the EspMon-RS hub
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate.

use thiserror::Error;

/// Main error type for EspMon-RS operations
#[derive(Error, Debug)]
pub enum EspMonError {
    /// Errors related to settings or data directory resolution
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors reading or writing the registry file
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Import file rejected before touching in-memory state
    #[error("Import error: {0}")]
    Import(String),

    /// Command payload is not valid JSON
    #[error("Invalid command payload: {0}")]
    InvalidCommand(String),

    /// Lookup of a registry record failed
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Insert would create a second record with the same identity
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// A record references a device that does not exist
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Outbound datagram could not be delivered
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EspMonError>,
    },
}

impl EspMonError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EspMonError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EspMonError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        EspMonError::Duplicate {
            kind,
            id: id.into(),
        }
    }
}

/// Result type alias for EspMon-RS operations
pub type Result<T> = std::result::Result<T, EspMonError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| EspMonError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EspMonError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EspMonError::InvalidCommand("expected value at line 1".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid command payload: expected value at line 1"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = EspMonError::Persistence("disk full".to_string());
        let with_ctx = err.with_context("Failed to save registry");
        assert!(with_ctx.to_string().contains("Failed to save registry"));
        assert!(with_ctx.to_string().contains("disk full"));
    }

    #[test]
    fn test_not_found_error() {
        let err = EspMonError::not_found("device", "esp32-1");
        assert_eq!(err.to_string(), "device not found: esp32-1");
    }

    #[test]
    fn test_io_result_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = res.context("Opening export file").unwrap_err();
        assert!(err.to_string().starts_with("Opening export file"));
    }
}
