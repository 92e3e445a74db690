//! Error types for Costscope

use thiserror::Error;

/// Result type alias using Costscope's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Costscope operations
#[derive(Error, Debug)]
pub enum Error {
    /// A request named a filter, group-by, aggregation or granularity the
    /// compiler does not support
    #[error("Unsupported {kind}: {value}")]
    Unsupported {
        /// What was being compiled (e.g. "aggregation")
        kind: &'static str,
        /// The offending value
        value: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backing store reported itself unavailable before any SQL ran
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A column did not hold the type its field declares
    #[error("Decode error for {field}: expected {expected}, found {found}")]
    Decode {
        /// Output field being decoded
        field: String,
        /// Declared data type
        expected: String,
        /// What the row actually held
        found: String,
    },

    /// An external id lookup failed
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an unsupported-value error
    pub fn unsupported(kind: &'static str, value: impl ToString) -> Self {
        Self::Unsupported {
            kind,
            value: value.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a service unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Create a decode error
    pub fn decode(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::Decode {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a lookup error
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error was caused by the request itself rather than the
    /// store or the process
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Unsupported { .. } | Self::Validation(_) | Self::Serialization(_)
        )
    }
}
