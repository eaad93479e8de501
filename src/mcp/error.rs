//! MCP Error Types

use http::StatusCode;
use thiserror::Error;

use crate::auth::AuthError;
use crate::connection::BackendError;
use crate::mcp::protocol::{error_codes, JsonRpcError};

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("A destination is required; send the x-mcp-destination header or configure a default")]
    DestinationRequired,

    #[error("Connection headers are required; send x-sap-url with JWT or basic credentials")]
    HeadersRequired,

    #[error("Invalid connection headers: {0}")]
    InvalidHeaders(String),

    #[error("Malformed backend state: {0}")]
    MalformedBackendState(String),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Unsupported protocol version: {client} (supported: {})", .supported.join(", "))]
    UnsupportedProtocolVersion { client: String, supported: Vec<String> },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl McpError {
    /// Convert to JSON-RPC error code
    pub fn error_code(&self) -> i32 {
        match self {
            McpError::ParseError(_) => error_codes::PARSE_ERROR,
            McpError::InvalidRequest(_) | McpError::UnsupportedProtocolVersion { .. } => {
                error_codes::INVALID_REQUEST
            }
            McpError::MethodNotFound(_) | McpError::ToolNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::InvalidHeaders(_) => error_codes::INVALID_PARAMS,
            McpError::SessionNotFound(_) => error_codes::SESSION_NOT_FOUND,
            McpError::DestinationRequired | McpError::HeadersRequired => {
                error_codes::CONNECTION_REQUIRED
            }
            McpError::BrokerUnavailable(_) => error_codes::CONNECTION_ERROR,
            McpError::Backend(_) | McpError::MalformedBackendState(_) => error_codes::BACKEND_ERROR,
            McpError::ToolExecution(_) => error_codes::TOOL_EXECUTION_ERROR,
            McpError::InternalError(_) | McpError::SerializationError(_) => {
                error_codes::INTERNAL_ERROR
            }
        }
    }

    /// HTTP status used when the error surfaces at the transport level
    pub fn status_code(&self) -> StatusCode {
        match self {
            McpError::ParseError(_)
            | McpError::InvalidRequest(_)
            | McpError::InvalidParams(_)
            | McpError::SessionNotFound(_)
            | McpError::DestinationRequired
            | McpError::HeadersRequired
            | McpError::InvalidHeaders(_)
            | McpError::UnsupportedProtocolVersion { .. } => StatusCode::BAD_REQUEST,
            McpError::MethodNotFound(_) | McpError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            McpError::BrokerUnavailable(_)
            | McpError::Backend(_)
            | McpError::MalformedBackendState(_) => StatusCode::BAD_GATEWAY,
            McpError::ToolExecution(_)
            | McpError::InternalError(_)
            | McpError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to JsonRpcError
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError { code: self.error_code(), message: self.to_string(), data: None }
    }
}

impl From<McpError> for JsonRpcError {
    fn from(error: McpError) -> Self {
        error.to_json_rpc_error()
    }
}

impl From<AuthError> for McpError {
    fn from(error: AuthError) -> Self {
        McpError::BrokerUnavailable(error.to_string())
    }
}

impl From<BackendError> for McpError {
    fn from(error: BackendError) -> Self {
        McpError::Backend(error.to_string())
    }
}
