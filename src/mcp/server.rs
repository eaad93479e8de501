//! MCP Server
//!
//! Protocol method dispatch and per-call connection injection. The server is
//! built once and shared by every transport; the connection context arrives
//! with each call, so handlers never see how their connection was obtained.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn, Instrument};

use crate::auth::AuthBrokerFactory;
use crate::connection::{
    BackendConnection, ConnectionFactory, ConnectionProvider, ProviderMode, RefreshingConnection,
};
use crate::mcp::context::ConnectionContext;
use crate::mcp::error::McpError;
use crate::mcp::protocol::{
    ContentBlock, InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult, ToolsCapability,
    ToolsListResult, SUPPORTED_VERSIONS,
};
use crate::mcp::session::{AbapSession, SessionManager};
use crate::mcp::tool_registry::{
    HandlerKind, LegacyCall, ToolContent, ToolContext, ToolOutput, ToolRegistry,
};
use crate::tool_span;

/// Version assumed when the client sends none
const DEFAULT_CLIENT_VERSION: &str = "2024-11-05";

/// Pick the highest supported version not newer than the client's
pub(crate) fn negotiate_version(client_version: &str) -> Result<String, McpError> {
    let negotiated = SUPPORTED_VERSIONS.iter().rev().find(|&&v| v <= client_version).copied();

    match negotiated {
        Some(v) => Ok(v.to_string()),
        None => Err(McpError::UnsupportedProtocolVersion {
            client: client_version.to_string(),
            supported: SUPPORTED_VERSIONS.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

/// Turn handler output into a protocol result.
///
/// JSON items become pretty-printed text; an error-flagged output becomes an error.
pub fn normalize_output(output: ToolOutput) -> Result<ToolCallResult, McpError> {
    let mut content = Vec::with_capacity(output.content.len());
    for item in output.content {
        let text = match item {
            ToolContent::Text(text) => text,
            ToolContent::Json(value) => serde_json::to_string_pretty(&value)?,
        };
        content.push(ContentBlock::Text { text });
    }

    if output.is_error {
        let message = content
            .iter()
            .map(|ContentBlock::Text { text }| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        return Err(McpError::ToolExecution(message));
    }

    Ok(ToolCallResult { content, is_error: None })
}

pub struct McpServer {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
    provider: Arc<dyn ConnectionProvider>,
    connections: Arc<dyn ConnectionFactory>,
    brokers: Option<Arc<AuthBrokerFactory>>,
    server_info: ServerInfo,
}

impl McpServer {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
        provider: Arc<dyn ConnectionProvider>,
        connections: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            registry,
            sessions,
            provider,
            connections,
            brokers: None,
            server_info: ServerInfo::default(),
        }
    }

    /// Enable refresh-on-401 for destinations with a registered broker
    pub fn with_brokers(mut self, brokers: Arc<AuthBrokerFactory>) -> Self {
        self.brokers = Some(brokers);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    /// Dispatch one request. Notifications yield no response.
    pub async fn handle_request(
        &self,
        ctx: &ConnectionContext,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let JsonRpcRequest { jsonrpc, id, method, params } = request;
        tracing::Span::current().record("method", method.as_str());
        debug!(method = %method, id = ?id, "Handling MCP request");

        let result = if jsonrpc != "2.0" {
            Err(McpError::InvalidRequest(format!("unsupported jsonrpc version '{}'", jsonrpc)))
        } else {
            match method.as_str() {
                "initialize" => self.handle_initialize(params),
                "ping" => Ok(json!({})),
                "tools/list" => self.handle_tools_list(),
                "tools/call" => self.handle_tools_call(ctx, params).await,
                m if m.starts_with("notifications/") => {
                    debug!(method = %m, "Received notification");
                    Ok(json!({}))
                }
                m => Err(McpError::MethodNotFound(m.to_string())),
            }
        };

        // Notifications never receive a response
        if id.is_none() {
            if let Err(e) = result {
                debug!(method = %method, error = %e, "Notification failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                warn!(method = %method, error = %e, "MCP request failed");
                JsonRpcResponse::failure(id, e.to_json_rpc_error())
            }
        })
    }

    fn handle_initialize(&self, params: Value) -> Result<Value, McpError> {
        let params: InitializeParams = if params.is_null() {
            InitializeParams::default()
        } else {
            serde_json::from_value(params).map_err(|e| {
                McpError::InvalidParams(format!("Failed to parse initialize params: {}", e))
            })?
        };

        let client_version = if params.protocol_version.is_empty() {
            DEFAULT_CLIENT_VERSION
        } else {
            params.protocol_version.as_str()
        };
        let negotiated = negotiate_version(client_version)?;

        debug!(
            client_version = %client_version,
            negotiated_version = %negotiated,
            client_name = ?params.client_info.as_ref().map(|c| c.name.as_str()),
            "Protocol version negotiated"
        );

        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.server_info.clone(),
            instructions: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    fn handle_tools_list(&self) -> Result<Value, McpError> {
        let result = ToolsListResult { tools: self.registry.definitions(), next_cursor: None };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_tools_call(
        &self,
        ctx: &ConnectionContext,
        params: Value,
    ) -> Result<Value, McpError> {
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| McpError::InvalidParams(format!("Invalid tool call params: {}", e)))?;
        let entry =
            self.registry.get(&params.name).ok_or_else(|| McpError::ToolNotFound(params.name.clone()))?;

        let span = tool_span!(params.name, ctx.session_id);
        if let Some(destination) = &ctx.destination {
            span.record("destination", destination.as_str());
        }

        let connection = self.connect(ctx)?;
        let arguments = params.arguments.unwrap_or_else(|| json!({}));

        let output = match &entry.handler {
            HandlerKind::Contextual(handler) => {
                let tool_ctx = ToolContext {
                    connection: connection.clone(),
                    session_id: ctx.session_id.clone(),
                    destination: ctx.destination.clone(),
                    span: span.clone(),
                };
                handler(tool_ctx, arguments).instrument(span).await
            }
            HandlerKind::Legacy(handler) => {
                let call = LegacyCall { connection: connection.clone(), arguments };
                handler(call).instrument(span).await
            }
        };

        self.record_backend_state(ctx, connection.as_ref());

        let result = normalize_output(output?)?;
        Ok(serde_json::to_value(result)?)
    }

    /// Build the live connection for a call from its context
    fn connect(&self, ctx: &ConnectionContext) -> Result<Arc<dyn BackendConnection>, McpError> {
        let params = ctx.params.clone().ok_or_else(|| match self.provider.mode() {
            ProviderMode::Local => McpError::DestinationRequired,
            ProviderMode::Remote => McpError::HeadersRequired,
        })?;

        let state = ctx.abap_session.as_ref().map(AbapSession::state_tokens).unwrap_or_default();
        let connection = self.connections.create(&params, &state)?;

        let broker = match (&self.brokers, &ctx.destination) {
            (Some(brokers), Some(destination)) => {
                brokers.get_broker(ctx.session_id.as_str(), Some(destination))
            }
            _ => None,
        };

        Ok(match broker {
            Some(broker) => Arc::new(RefreshingConnection::new(
                ctx.session_id.clone(),
                params,
                connection,
                broker,
                self.connections.clone(),
                self.provider.clone(),
            )),
            None => connection,
        })
    }

    /// Store backend state tokens on tracked sessions when they changed
    fn record_backend_state(&self, ctx: &ConnectionContext, connection: &dyn BackendConnection) {
        if !ctx.tracked {
            return;
        }
        let tokens = connection.state_tokens();
        if tokens.is_empty() {
            return;
        }

        match AbapSession::parse(&tokens) {
            Ok(parsed) if ctx.abap_session.as_ref() == Some(&parsed) => {}
            Ok(_) => {
                if let Err(e) = self.sessions.set_abap_session(&ctx.session_id, &tokens) {
                    debug!(session_id = %ctx.session_id, error = %e, "Backend state not recorded");
                }
            }
            Err(e) => {
                debug!(session_id = %ctx.session_id, error = %e, "Backend returned no session state");
            }
        }
    }
}
