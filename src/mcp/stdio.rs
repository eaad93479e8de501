//! MCP Stdio Transport
//!
//! Line-delimited JSON-RPC on stdin/stdout with a single well-known session.
//! Messages are handled one at a time in arrival order. EOF on stdin closes the
//! session just like [`Transport::stop`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TransportKind;
use crate::connection::ConnectionRequest;
use crate::errors::{Error, Result};
use crate::mcp::error::McpError;
use crate::mcp::events::Listeners;
use crate::mcp::handler::parse_request;
use crate::mcp::protocol::JsonRpcResponse;
use crate::mcp::session::{SessionId, SessionOrigin};
use crate::mcp::transport::{BindScope, Transport, TransportEvent};
use crate::mcp::transport_common::TransportServices;

type BoxReader = Box<dyn AsyncBufRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct StdioTransport {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    services: TransportServices,
    reader: Mutex<Option<BoxReader>>,
    writer: Mutex<BoxWriter>,
    events: Listeners<TransportEvent>,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
    done: CancellationToken,
}

impl StdioTransport {
    /// Transport over the process's stdin and stdout
    pub fn new(services: TransportServices) -> Self {
        Self::with_io(services, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }

    pub fn with_io<R, W>(services: TransportServices, reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(StdioInner {
                services,
                reader: Mutex::new(Some(Box::new(reader))),
                writer: Mutex::new(Box::new(writer)),
                events: Listeners::new("stdio_transport"),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                done: CancellationToken::new(),
            }),
        }
    }
}

impl StdioInner {
    async fn open_session(&self) -> Result<SessionId> {
        let session_id = SessionId::stdio();
        let destination = self.services.default_destination.clone();
        let origin = SessionOrigin::new(TransportKind::Stdio).with_destination(destination.clone());

        self.services
            .sessions
            .create_session_with_id(session_id.clone(), origin)
            .map_err(|e| Error::transport(e.to_string()))?;

        match destination {
            Some(destination) => {
                let request = ConnectionRequest::for_destination(session_id.clone(), destination);
                if let Err(e) = self.services.provision_session(&request).await {
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to provision stdio session; only metadata requests will succeed"
                    );
                }
            }
            None => {
                info!("No destination configured; tool calls need one before they can run");
            }
        }

        self.events.emit(&TransportEvent::SessionCreated(session_id.clone()));
        Ok(session_id)
    }

    async fn run(self: Arc<Self>, reader: BoxReader, session_id: SessionId) {
        let mut lines = reader.lines();

        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    debug!(bytes = line.len(), "Received input line");
                    self.dispatch(&session_id, &line).await;
                }
                Ok(None) => {
                    info!("MCP stdio transport shutting down (EOF received)");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from stdin");
                    break;
                }
            }
        }

        self.close(&session_id);
    }

    async fn dispatch(&self, session_id: &SessionId, line: &str) {
        let response = match parse_request(line) {
            Ok(request) => {
                self.events.emit(&TransportEvent::Message {
                    session_id: session_id.clone(),
                    request: request.clone(),
                });
                self.services.handler.handle(session_id, request).await
            }
            Err(response) => Some(response),
        };

        if let Some(response) = response {
            if let Err(e) = self.write(&response).await {
                error!(error = %e, "Failed to write response to stdout");
            }
        }
    }

    async fn write(&self, response: &JsonRpcResponse) -> std::io::Result<()> {
        let json = serde_json::to_string(response)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Runs once, on EOF or stop
    fn close(&self, session_id: &SessionId) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.services.close_session(session_id);
        self.events.emit(&TransportEvent::SessionClosed(session_id.clone()));
        self.done.cancel();
        info!(session_id = %session_id, "Stdio session closed");
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn bind_scope(&self) -> BindScope {
        BindScope::Loopback
    }

    async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::transport("stdio transport already started"));
        }
        let reader = self
            .inner
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::transport("stdio input already consumed"))?;

        let session_id = self.inner.open_session().await?;
        info!(session_id = %session_id, "Starting MCP stdio transport");

        tokio::spawn(self.inner.clone().run(reader, session_id));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        if self.inner.started.load(Ordering::SeqCst) {
            self.inner.done.cancelled().await;
        } else {
            self.inner.done.cancel();
        }
        Ok(())
    }

    async fn send(
        &self,
        session_id: &SessionId,
        message: JsonRpcResponse,
    ) -> std::result::Result<(), McpError> {
        if session_id.as_str() != crate::mcp::session::STDIO_SESSION_ID
            || self.inner.closed.load(Ordering::SeqCst)
        {
            return Err(McpError::SessionNotFound(session_id.to_string()));
        }
        self.inner.write(&message).await.map_err(|e| McpError::InternalError(e.to_string()))
    }

    fn events(&self) -> &Listeners<TransportEvent> {
        &self.inner.events
    }

    async fn closed(&self) {
        self.inner.done.cancelled().await;
    }
}
