//! MCP SSE (Server-Sent Events) Transport
//!
//! GET on the SSE path opens a stream bound to a new session. The first event
//! is `endpoint`, carrying the URL clients POST their messages to. Responses
//! are delivered as `message` events on the same stream, in the order the
//! messages were posted.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{TransportConfig, TransportKind};
use crate::connection::header_value;
use crate::errors::{Error, Result};
use crate::mcp::connection::{SseConnection, SseConnections};
use crate::mcp::error::McpError;
use crate::mcp::events::Listeners;
use crate::mcp::handler::parse_request;
use crate::mcp::http::{bind, spawn_server};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::mcp::session::{SessionId, SessionOrigin};
use crate::mcp::transport::{BindScope, Transport, TransportEvent};
use crate::mcp::transport_common::{
    connection_request, mcp_error_response, resolve_connection_source, text_error,
    TransportServices, SESSION_ID_HEADER, SESSION_ID_REQUEST_HEADER,
};

/// State shared by the SSE routes
struct SseState {
    services: TransportServices,
    connections: SseConnections,
    events: Listeners<TransportEvent>,
    message_path: String,
    keep_alive: Duration,
    shutdown: CancellationToken,
}

pub struct SseTransport {
    state: Arc<SseState>,
    config: TransportConfig,
    started: AtomicBool,
    done: CancellationToken,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl SseTransport {
    pub fn new(services: TransportServices, config: TransportConfig) -> Self {
        let state = SseState {
            services,
            connections: SseConnections::new(),
            events: Listeners::new("sse_transport"),
            message_path: config.sse_message_path.clone(),
            keep_alive: config.keep_alive(),
            shutdown: CancellationToken::new(),
        };
        Self {
            state: Arc::new(state),
            config,
            started: AtomicBool::new(false),
            done: CancellationToken::new(),
            local_addr: RwLock::new(None),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.sse_path, get(sse_handler))
            .route(&self.config.sse_message_path, post(message_handler))
            .with_state(self.state.clone())
    }

    /// Address the transport is listening on once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.read().ok().and_then(|addr| *addr)
    }

    /// Number of open streams
    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }
}

/// Stream wrapper that closes the session when the client goes away
struct CleanupStream<S> {
    inner: S,
    state: Arc<SseState>,
    session_id: SessionId,
}

impl<S: Stream + Unpin> Stream for CleanupStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for CleanupStream<S> {
    fn drop(&mut self) {
        info!(session_id = %self.session_id, "SSE connection closed, cleaning up");
        self.state.connections.unregister(&self.session_id);
        self.state.services.close_session(&self.session_id);
        self.state.events.emit(&TransportEvent::SessionClosed(self.session_id.clone()));
    }
}

/// Closes a session whose stream was never handed to the client
struct PendingSession {
    state: Arc<SseState>,
    session_id: SessionId,
    armed: bool,
}

impl PendingSession {
    fn new(state: Arc<SseState>, session_id: SessionId) -> Self {
        Self { state, session_id, armed: true }
    }

    /// The stream owns the session from here on
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        if self.armed {
            debug!(session_id = %self.session_id, "SSE handshake abandoned, closing session");
            self.state.services.close_session(&self.session_id);
        }
    }
}

fn message_event(message: &JsonRpcResponse) -> Event {
    let data = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    Event::default().event("message").data(data)
}

/// Handles posted messages one at a time so responses keep their order
async fn inbound_worker(
    state: Arc<SseState>,
    session_id: SessionId,
    mut inbound: mpsc::Receiver<JsonRpcRequest>,
    outbound: mpsc::Sender<JsonRpcResponse>,
) {
    while let Some(request) = inbound.recv().await {
        state.events.emit(&TransportEvent::Message {
            session_id: session_id.clone(),
            request: request.clone(),
        });

        if let Some(response) = state.services.handler.handle(&session_id, request).await {
            if outbound.send(response).await.is_err() {
                debug!(session_id = %session_id, "SSE stream gone, discarding response");
                break;
            }
        }
    }
    debug!(session_id = %session_id, "SSE inbound worker finished");
}

/// GET on the SSE path
async fn sse_handler(State(state): State<Arc<SseState>>, request: Request) -> Response {
    let headers = request.headers();
    let client_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    let source = resolve_connection_source(headers, state.services.default_destination.as_deref());
    let origin = SessionOrigin::new(TransportKind::Sse)
        .with_client_address(client_address)
        .with_destination(source.destination().map(str::to_string));
    let session = state.services.sessions.create_session(origin);
    let session_id = session.id;
    let pending = PendingSession::new(state.clone(), session_id.clone());

    match connection_request(&session_id, &source, headers) {
        Some(request) => {
            if let Err(e) = state.services.provision_session(&request).await {
                return mcp_error_response(&e);
            }
        }
        None => {
            debug!(session_id = %session_id, "No connection context; only metadata requests will succeed");
        }
    }

    let (connection, receivers) = SseConnection::channel();
    tokio::spawn(inbound_worker(
        state.clone(),
        session_id.clone(),
        receivers.inbound,
        connection.outbound().clone(),
    ));
    state.connections.register(session_id.clone(), connection);
    state.events.emit(&TransportEvent::SessionCreated(session_id.clone()));

    info!(session_id = %session_id, source = ?source, "SSE connection established");

    let endpoint = format!("{}?sessionId={}", state.message_path, session_id);
    let shutdown = state.shutdown.clone();
    let mut outbound = receivers.outbound;
    let events = async_stream::stream! {
        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                message = outbound.recv() => message,
            };
            match next {
                Some(message) => yield Ok(message_event(&message)),
                None => break,
            }
        }
    };

    let stream = CleanupStream {
        inner: Box::pin(events),
        state: state.clone(),
        session_id: session_id.clone(),
    };
    pending.disarm();
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive).text("ping"));

    let header_name = HeaderName::from_static(SESSION_ID_HEADER);
    ([(header_name, session_id.to_string())], sse).into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// POST on the message path
async fn message_handler(
    State(state): State<Arc<SseState>>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session_id = query
        .session_id
        .or_else(|| header_value(&headers, SESSION_ID_REQUEST_HEADER).map(str::to_string))
        .filter(|id| !id.trim().is_empty());

    let Some(session_id) = session_id.map(SessionId::new) else {
        return text_error(StatusCode::BAD_REQUEST, "Missing sessionId");
    };

    if !state.connections.contains(&session_id) {
        return text_error(StatusCode::BAD_REQUEST, format!("Unknown session: {}", session_id));
    }

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(_) => return text_error(StatusCode::BAD_REQUEST, "Invalid JSON-RPC message"),
    };

    match state.connections.enqueue(&session_id, request) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(McpError::SessionNotFound(id)) => {
            text_error(StatusCode::BAD_REQUEST, format!("Unknown session: {}", id))
        }
        Err(e) => mcp_error_response(&e),
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn bind_scope(&self) -> BindScope {
        self.config.bind_scope()
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::transport("SSE transport already started"));
        }
        let listener = bind(&self.config.bind_address()).await?;
        if let Ok(mut addr) = self.local_addr.write() {
            *addr = listener.local_addr().ok();
        }
        spawn_server(
            listener,
            self.router(),
            "sse",
            self.state.shutdown.clone(),
            self.done.clone(),
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.shutdown.cancel();
        if self.started.load(Ordering::SeqCst) {
            self.done.cancelled().await;
        } else {
            self.done.cancel();
        }
        Ok(())
    }

    async fn send(
        &self,
        session_id: &SessionId,
        message: JsonRpcResponse,
    ) -> std::result::Result<(), McpError> {
        self.state.connections.send(session_id, message).await
    }

    fn events(&self) -> &Listeners<TransportEvent> {
        &self.state.events
    }

    async fn closed(&self) {
        self.done.cancelled().await;
    }
}
