//! Capture bridge error types

use thiserror::Error;

/// Capture bridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A query filter that cannot be honoured for this call
    #[error("Invalid filter '{field}': {message}")]
    InvalidFilter { field: String, message: String },

    /// Unknown session id
    #[error("Session {0} not found")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV rendering error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Build an [`Error::InvalidFilter`] for the named field.
    pub fn invalid_filter(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for capture bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Serialize a value for a JSON response body.
///
/// Serialization of the crate's own view types cannot fail in practice; if it
/// ever does, the error is reported inline instead of panicking the handler.
pub fn to_json<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize response");
        serde_json::json!({"error": {"code": "INTERNAL_ERROR", "message": e.to_string()}})
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_display() {
        let err = Error::invalid_filter("status", "status_min 500 exceeds status_max 400");
        assert_eq!(
            err.to_string(),
            "Invalid filter 'status': status_min 500 exceeds status_max 400"
        );
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(Error::NotFound("42".to_string()).to_string(), "Session 42 not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.toml");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "IO error: missing.toml");
    }

    #[test]
    fn test_to_json() {
        let value = to_json(vec![1, 2, 3]);
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }
}
