//! ddbsync Error Types

use thiserror::Error;

/// Result type alias for ddbsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// ddbsync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not writer: current writer is {writer}")]
    NotWriter { writer: String },

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Delivery to {target} rejected with status {status}")]
    DeliveryRejected { target: String, status: u16 },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Roster errors
    #[error("State error: {0}")]
    State(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is a transient delivery failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::Network(_)
                | Error::DeliveryRejected { .. }
        )
    }

    /// Stable machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            Error::Database(_) | Error::QueryExecution(_) => "STORAGE_ERROR",
            Error::InvalidRequest(_) | Error::Serialization(_) => "INVALID_REQUEST",
            Error::NotWriter { .. } => "NOT_WRITER",
            Error::Replication(_) | Error::DeliveryRejected { .. } => "REPLICATION_ERROR",
            Error::Network(_) | Error::ConnectionTimeout(_) => "NETWORK_ERROR",
            Error::State(_) => "STATE_ERROR",
            Error::Io(_) | Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            let target = e.url().map(|u| u.to_string()).unwrap_or_default();
            Error::ConnectionTimeout(target)
        } else {
            Error::Network(e.to_string())
        }
    }
}
