//! # Error Handling
//!
//! Process-level errors for the ADT MCP gateway: configuration, start-up
//! consistency checks and transport failures. Request-level failures use
//! [`crate::mcp::error::McpError`] instead.

/// Custom result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway process
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport bind scope and connection provider mode disagree
    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// Network transport errors (stdio, SSE, HTTP)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new configuration mismatch error
    pub fn mismatch<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationMismatch(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error is a fatal start-up inconsistency
    pub fn is_configuration_mismatch(&self) -> bool {
        matches!(self, Self::ConfigurationMismatch(_))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Config(format!("Validation failed: {}", errors))
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
