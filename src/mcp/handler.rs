//! MCP Protocol Handler
//!
//! Entry point for transports: binds an inbound message to its session's
//! connection context and hands it to the [`McpServer`]. A panic while
//! handling a request becomes an internal error response for that request.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, warn, Instrument};

use crate::config::TransportKind;
use crate::mcp::context::ConnectionContext;
use crate::mcp::error::McpError;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::mcp::server::McpServer;
use crate::mcp::session::{SessionId, SessionManager};
use crate::session_span;

/// Parse one raw JSON-RPC message; failures come back as a ready response.
pub fn parse_request(raw: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
    serde_json::from_str(raw).map_err(|e| {
        warn!(error = %e, "Failed to parse JSON-RPC request");
        JsonRpcResponse::failure(None, McpError::ParseError(e.to_string()).to_json_rpc_error())
    })
}

#[derive(Clone)]
pub struct ProtocolHandler {
    server: Arc<McpServer>,
    sessions: Arc<SessionManager>,
}

impl ProtocolHandler {
    pub fn new(server: Arc<McpServer>, sessions: Arc<SessionManager>) -> Self {
        Self { server, sessions }
    }

    pub fn server(&self) -> &Arc<McpServer> {
        &self.server
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Handle a request on a tracked session
    pub async fn handle(
        &self,
        session_id: &SessionId,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let Some(session) = self.sessions.get_session(session_id) else {
            warn!(session_id = %session_id, method = %request.method, "Message for unknown session");
            if request.is_notification() {
                return None;
            }
            let error = McpError::SessionNotFound(session_id.to_string());
            return Some(JsonRpcResponse::failure(request.id, error.to_json_rpc_error()));
        };

        let span = session_span!(session.metadata.transport, session_id);
        let ctx = ConnectionContext::from_session(&session);
        let response = self.dispatch(&ctx, request).instrument(span).await;

        let is_error = response.as_ref().is_some_and(JsonRpcResponse::is_error);
        self.sessions.record_request(session_id, is_error);
        response
    }

    /// Handle a request whose context was resolved by the caller
    pub async fn handle_with_context(
        &self,
        transport: TransportKind,
        ctx: &ConnectionContext,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let span = session_span!(transport, ctx.session_id);
        self.dispatch(ctx, request).instrument(span).await
    }

    async fn dispatch(
        &self,
        ctx: &ConnectionContext,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let method = request.method.clone();
        match AssertUnwindSafe(self.server.handle_request(ctx, request)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                error!(method = %method, "Request handler panicked");
                let error = McpError::InternalError("Request handler panicked".to_string());
                id.map(|id| JsonRpcResponse::failure(Some(id), error.to_json_rpc_error()))
            }
        }
    }

    /// Handle a raw message on a tracked session
    pub async fn handle_message(&self, session_id: &SessionId, raw: &str) -> Option<JsonRpcResponse> {
        match parse_request(raw) {
            Ok(request) => self.handle(session_id, request).await,
            Err(response) => Some(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{
        AuthDescriptor, ConnectionParams, HttpConnectionFactory, RemoteConnectionProvider,
        SapHeaderValidator,
    };
    use crate::mcp::protocol::error_codes;
    use crate::mcp::session::SessionOrigin;
    use crate::mcp::protocol::Tool;
    use crate::mcp::tool_registry::{ToolContext, ToolGroup, ToolOutput, ToolRegistry};
    use serde_json::{json, Value};

    fn handler() -> ProtocolHandler {
        handler_with(ToolRegistry::new())
    }

    /// Registry whose `Boom` tool indexes past the end of an empty list
    fn panicking_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register_contextual(
                ToolGroup::ReadOnly,
                Tool::new("Boom", "Always panics", json!({"type": "object"})),
                |_ctx: ToolContext, _args: Value| async move {
                    let outputs: Vec<ToolOutput> = Vec::new();
                    Ok::<_, McpError>(outputs[0].clone())
                },
            )
            .unwrap();
        registry
    }

    fn handler_with(registry: ToolRegistry) -> ProtocolHandler {
        let sessions = Arc::new(SessionManager::new());
        let server = McpServer::new(
            Arc::new(registry),
            sessions.clone(),
            Arc::new(RemoteConnectionProvider::new(Arc::new(SapHeaderValidator))),
            Arc::new(HttpConnectionFactory::from_client(reqwest::Client::new())),
        );
        ProtocolHandler::new(Arc::new(server), sessions)
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let handler = handler();
        let response = handler
            .handle(&SessionId::new("ghost"), JsonRpcRequest::new(1, "ping", json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::SESSION_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_requests_are_counted() {
        let handler = handler();
        let session = handler.sessions().create_session(SessionOrigin::default());

        handler.handle(&session.id, JsonRpcRequest::new(1, "ping", json!({}))).await.unwrap();
        handler.handle(&session.id, JsonRpcRequest::new(2, "nope", json!({}))).await.unwrap();

        let meta = handler.sessions().get_session(&session.id).unwrap().metadata;
        assert_eq!(meta.request_count, 2);
        assert_eq!(meta.error_count, 1);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let handler = handler();
        let session = handler.sessions().create_session(SessionOrigin::default());
        let response = handler.handle_message(&session.id, "{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::PARSE_ERROR);
        assert!(response.id.is_none());
    }

    #[tokio::test]
    async fn test_panicking_tool_becomes_internal_error() {
        let handler = handler_with(panicking_registry());
        let session = handler.sessions().create_session(SessionOrigin::default());
        let auth = AuthDescriptor::jwt("token", None).unwrap();
        let params = ConnectionParams::new("https://dev.example.com", auth);
        handler.sessions().update_connection_params(&session.id, params).unwrap();

        let call = JsonRpcRequest::new(1, "tools/call", json!({"name": "Boom", "arguments": {}}));
        let response = handler.handle(&session.id, call).await.unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::INTERNAL_ERROR);

        // The same session keeps working afterwards
        let pong = handler.handle(&session.id, JsonRpcRequest::new(2, "ping", json!({}))).await.unwrap();
        assert!(pong.error.is_none());

        let meta = handler.sessions().get_session(&session.id).unwrap().metadata;
        assert_eq!(meta.request_count, 2);
        assert_eq!(meta.error_count, 1);
    }
}
