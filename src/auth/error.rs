//! Broker, service key and token store errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Service key not found for destination '{0}'")]
    ServiceKeyNotFound(String),

    #[error("Invalid service key for destination '{destination}': {reason}")]
    InvalidServiceKey { destination: String, reason: String },

    #[error("Invalid destination name '{0}'")]
    InvalidDestination(String),

    #[error("No token available for destination '{0}'")]
    NoToken(String),

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Token store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    pub fn invalid_key(destination: &str, reason: impl Into<String>) -> Self {
        Self::InvalidServiceKey { destination: destination.to_string(), reason: reason.into() }
    }
}
