//! MCP Streamable HTTP Transport
//!
//! Stateless request/response over POST. Every request gets a transient id
//! that never enters the session table; its connection context is resolved
//! from the request's own headers and thrown away afterwards, together with
//! any broker created for it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{TransportConfig, TransportKind};
use crate::errors::{Error, Result};
use crate::mcp::context::ConnectionContext;
use crate::mcp::error::McpError;
use crate::mcp::events::Listeners;
use crate::mcp::handler::parse_request;
use crate::mcp::http::{bind, spawn_server};
use crate::mcp::protocol::JsonRpcResponse;
use crate::mcp::session::SessionId;
use crate::mcp::transport::{BindScope, Transport, TransportEvent};
use crate::mcp::transport_common::{
    connection_request, mcp_error_response, resolve_connection_source, text_error,
    TransportServices,
};

const NO_CONTEXT_MESSAGE: &str = "No connection context: send x-mcp-destination, or x-sap-url \
     with credentials, or configure a default destination";

struct StreamableState {
    services: TransportServices,
    events: Listeners<TransportEvent>,
    /// Out-of-band responses for requests still in flight
    pending: DashMap<SessionId, oneshot::Sender<JsonRpcResponse>>,
}

pub struct StreamableHttpTransport {
    state: Arc<StreamableState>,
    config: TransportConfig,
    started: AtomicBool,
    shutdown: CancellationToken,
    done: CancellationToken,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl StreamableHttpTransport {
    pub fn new(services: TransportServices, config: TransportConfig) -> Self {
        Self {
            state: Arc::new(StreamableState {
                services,
                events: Listeners::new("streamable_http_transport"),
                pending: DashMap::new(),
            }),
            config,
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            done: CancellationToken::new(),
            local_addr: RwLock::new(None),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.http_path, post(post_handler).fallback(method_not_allowed))
            .with_state(self.state.clone())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.read().ok().and_then(|addr| *addr)
    }
}

async fn method_not_allowed() -> Response {
    text_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed; use POST")
}

/// Drops the in-flight entry and the request's brokers however the request ends
struct InFlight {
    state: Arc<StreamableState>,
    request_id: SessionId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state.pending.remove(&self.request_id);
        self.state.services.release_brokers(&self.request_id);
    }
}

async fn post_handler(
    State(state): State<Arc<StreamableState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request_id = SessionId::generate();
    let in_flight = InFlight { state: state.clone(), request_id: request_id.clone() };
    let services = &state.services;

    let source = resolve_connection_source(&headers, services.default_destination.as_deref());
    let Some(connection) = connection_request(&request_id, &source, &headers) else {
        return text_error(StatusCode::BAD_REQUEST, NO_CONTEXT_MESSAGE);
    };

    let params = match services.provider.get_connection_params(&connection).await {
        Ok(params) => params,
        Err(e) => return mcp_error_response(&e),
    };

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(response) => return (StatusCode::BAD_REQUEST, Json(response)).into_response(),
    };

    debug!(request_id = %request_id, method = %request.method, source = ?source, "Streamable HTTP request");
    state.events.emit(&TransportEvent::Message {
        session_id: request_id.clone(),
        request: request.clone(),
    });

    let (tx, mut rx) = oneshot::channel();
    state.pending.insert(request_id.clone(), tx);

    let ctx = ConnectionContext::transient(
        request_id.clone(),
        source.destination().map(str::to_string),
        Some(params),
    );
    let response = services
        .handler
        .handle_with_context(TransportKind::StreamableHttp, &ctx, request)
        .await;

    drop(in_flight);

    match response.or_else(|| rx.try_recv().ok()) {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    fn bind_scope(&self) -> BindScope {
        self.config.bind_scope()
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::transport("streamable HTTP transport already started"));
        }
        let listener = bind(&self.config.bind_address()).await?;
        if let Ok(mut addr) = self.local_addr.write() {
            *addr = listener.local_addr().ok();
        }
        spawn_server(
            listener,
            self.router(),
            "streamable-http",
            self.shutdown.clone(),
            self.done.clone(),
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        if self.started.load(Ordering::SeqCst) {
            self.done.cancelled().await;
        } else {
            self.done.cancel();
        }
        Ok(())
    }

    /// Delivers to a request that is still in flight
    async fn send(
        &self,
        session_id: &SessionId,
        message: JsonRpcResponse,
    ) -> std::result::Result<(), McpError> {
        let (_, tx) = self
            .state
            .pending
            .remove(session_id)
            .ok_or_else(|| McpError::SessionNotFound(session_id.to_string()))?;
        tx.send(message)
            .map_err(|_| McpError::InternalError("Request already completed".to_string()))
    }

    fn events(&self) -> &Listeners<TransportEvent> {
        &self.state.events
    }

    async fn closed(&self) {
        self.done.cancelled().await;
    }
}
