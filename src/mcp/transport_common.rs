//! MCP Transport Common Utilities
//!
//! Shared by the SSE and streamable HTTP transports: connection source
//! resolution from request headers, session provisioning and plain HTTP error
//! responses.
//!
//! Connection source priority:
//! 1. `x-mcp-destination` header
//! 2. direct connection headers (`x-sap-url` plus credentials)
//! 3. the configured default destination
//! 4. none

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::auth::AuthBrokerFactory;
use crate::connection::{
    destination_from_headers, has_connection_headers, ConnectionParams, ConnectionProvider,
    ConnectionRequest,
};
use crate::mcp::error::McpError;
use crate::mcp::handler::ProtocolHandler;
use crate::mcp::session::{SessionId, SessionManager};

/// Response header carrying the session id
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Request header naming the session of a posted message
pub const SESSION_ID_REQUEST_HEADER: &str = "x-session-id";

/// Where a request's connection comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSource {
    Destination(String),
    Headers,
    None,
}

impl ConnectionSource {
    pub fn destination(&self) -> Option<&str> {
        match self {
            ConnectionSource::Destination(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ConnectionSource::None)
    }
}

pub fn resolve_connection_source(
    headers: &HeaderMap,
    default_destination: Option<&str>,
) -> ConnectionSource {
    if let Some(destination) = destination_from_headers(headers) {
        return ConnectionSource::Destination(destination);
    }
    if has_connection_headers(headers) {
        return ConnectionSource::Headers;
    }
    match default_destination.map(str::trim).filter(|d| !d.is_empty()) {
        Some(destination) => ConnectionSource::Destination(destination.to_string()),
        None => ConnectionSource::None,
    }
}

/// Provider request for a resolved source; `None` when there is nothing to resolve.
///
/// Connection headers travel along whenever they are complete, so each
/// provider mode finds what it needs.
pub fn connection_request(
    session_id: &SessionId,
    source: &ConnectionSource,
    headers: &HeaderMap,
) -> Option<ConnectionRequest> {
    if source.is_none() {
        return None;
    }
    Some(ConnectionRequest {
        session_id: session_id.clone(),
        destination: source.destination().map(str::to_string),
        headers: has_connection_headers(headers).then(|| headers.clone()),
    })
}

/// Collaborators every network transport is wired with
#[derive(Clone)]
pub struct TransportServices {
    pub handler: ProtocolHandler,
    pub sessions: Arc<SessionManager>,
    pub provider: Arc<dyn ConnectionProvider>,
    pub brokers: Option<Arc<AuthBrokerFactory>>,
    pub default_destination: Option<String>,
}

impl TransportServices {
    /// Resolve and store connection params for a tracked session
    pub async fn provision_session(
        &self,
        request: &ConnectionRequest,
    ) -> Result<ConnectionParams, McpError> {
        let params = self.provider.get_connection_params(request).await?;
        self.sessions.update_connection_params(&request.session_id, params.clone())?;
        debug!(session_id = %request.session_id, url = %params.url, "Provisioned session");
        Ok(params)
    }

    /// Drop every broker created for the session
    pub fn release_brokers(&self, session_id: &SessionId) {
        if let Some(brokers) = &self.brokers {
            brokers.delete_broker(session_id.as_str(), None);
        }
    }

    /// Delete a tracked session together with its brokers
    pub fn close_session(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.delete_session(session_id);
        self.release_brokers(session_id);
        removed
    }
}

/// Short text error for transport level failures
pub fn text_error(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    warn!(status = %status, message = %message, "Transport request rejected");
    (status, message).into_response()
}

/// Transport level response for a request error
pub fn mcp_error_response(error: &McpError) -> Response {
    text_error(error.status_code(), error.to_string())
}
