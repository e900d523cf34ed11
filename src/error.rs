//! Central error types for the S3 probe
//!
//! Uses `thiserror` for ergonomic, type-safe error handling with
//! automatic `Display` and `Error` trait implementations.

use std::time::Duration;

use thiserror::Error;

/// Central error type for the S3 probe
#[derive(Error, Debug)]
pub enum Error {
    /// The service registry could not be queried or returned garbage
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// `gateway_destinations` metadata could not be parsed
    #[error("Malformed gateway destinations: {0}")]
    MalformedDestinations(String),

    /// Neither a proxy address nor an external FQDN is registered for a service
    #[error("Endpoint name not found for {0}")]
    EndpointNotFound(String),

    /// An object storage call failed
    #[error("Storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    /// An object storage call did not complete before its deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// A gateway target was discovered without any replica destination
    #[error("No gateway destinations for {0}")]
    NoGatewayDestinations(String),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP request error (from reqwest)
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Result type alias for probe operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Build a storage error from any displayable cause
    pub fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        Error::Storage {
            operation: operation.to_string(),
            message: cause.to_string(),
        }
    }

    /// Convert to a short human-readable message for log lines
    pub fn status_message(&self) -> String {
        match self {
            Error::Storage { operation, message } => format!("{} failed: {}", operation, message),
            Error::Timeout { operation, .. } => format!("{} timed out", operation),
            Error::NoGatewayDestinations(name) => {
                format!("Gateway {} has no destinations", name)
            }
            Error::HttpError(e) => format!("HTTP request failed: {}", e),
            _ => self.to_string(),
        }
    }
}
