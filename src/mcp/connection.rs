//! SSE Connection Registry
//!
//! Maps session ids to open SSE streams. Each entry carries the outbound
//! channel feeding the stream and the inbound queue drained by the
//! connection's sequential worker.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::mcp::error::McpError;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::mcp::session::SessionId;

/// Channel capacity for SSE messages
pub const CHANNEL_CAPACITY: usize = 100;

/// Sending halves for one open SSE stream
#[derive(Clone)]
pub struct SseConnection {
    outbound: mpsc::Sender<JsonRpcResponse>,
    inbound: mpsc::Sender<JsonRpcRequest>,
}

/// Receiving halves, owned by the stream and the inbound worker
pub struct SseReceivers {
    pub outbound: mpsc::Receiver<JsonRpcResponse>,
    pub inbound: mpsc::Receiver<JsonRpcRequest>,
}

impl SseConnection {
    /// Create a connection and the receivers that serve it
    pub fn channel() -> (Self, SseReceivers) {
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self { outbound: outbound_tx, inbound: inbound_tx },
            SseReceivers { outbound: outbound_rx, inbound: inbound_rx },
        )
    }

    pub fn outbound(&self) -> &mpsc::Sender<JsonRpcResponse> {
        &self.outbound
    }
}

#[derive(Default)]
pub struct SseConnections {
    connections: DashMap<SessionId, SseConnection>,
}

impl SseConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: SessionId, connection: SseConnection) {
        debug!(session_id = %session_id, "Registered SSE connection");
        self.connections.insert(session_id, connection);
    }

    /// Returns true if a connection was removed
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        let removed = self.connections.remove(session_id).is_some();
        if removed {
            debug!(session_id = %session_id, "Unregistered SSE connection");
        }
        removed
    }

    /// Queue a posted message for the connection's worker
    pub fn enqueue(&self, session_id: &SessionId, request: JsonRpcRequest) -> Result<(), McpError> {
        let inbound = self
            .connections
            .get(session_id)
            .map(|c| c.inbound.clone())
            .ok_or_else(|| McpError::SessionNotFound(session_id.to_string()))?;

        inbound.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(session_id = %session_id, "SSE inbound queue full, rejecting message");
                McpError::InternalError("Too many pending messages".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                McpError::SessionNotFound(session_id.to_string())
            }
        })
    }

    /// Push a response onto the connection's stream
    pub async fn send(&self, session_id: &SessionId, response: JsonRpcResponse) -> Result<(), McpError> {
        let outbound = self
            .connections
            .get(session_id)
            .map(|c| c.outbound.clone())
            .ok_or_else(|| McpError::SessionNotFound(session_id.to_string()))?;

        outbound
            .send(response)
            .await
            .map_err(|_| McpError::InternalError("Connection channel closed".to_string()))
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.connections.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

pub type SharedSseConnections = Arc<SseConnections>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_send_unregister() {
        let connections = SseConnections::new();
        let id = SessionId::new("s1");
        let (connection, mut receivers) = SseConnection::channel();

        connections.register(id.clone(), connection);
        assert!(connections.contains(&id));

        connections.send(&id, JsonRpcResponse::success(None, json!({}))).await.unwrap();
        assert!(receivers.outbound.try_recv().is_ok());

        connections.enqueue(&id, JsonRpcRequest::new(1, "ping", json!({}))).unwrap();
        assert_eq!(receivers.inbound.try_recv().unwrap().method, "ping");

        assert!(connections.unregister(&id));
        assert!(!connections.unregister(&id));
        assert!(connections.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let connections = SseConnections::new();
        let id = SessionId::new("ghost");

        let err = connections.enqueue(&id, JsonRpcRequest::new(1, "ping", json!({}))).unwrap_err();
        assert!(matches!(err, McpError::SessionNotFound(_)));
        assert!(connections.send(&id, JsonRpcResponse::success(None, json!({}))).await.is_err());
    }

    #[test]
    fn test_full_queue_rejects() {
        let connections = SseConnections::new();
        let id = SessionId::new("busy");
        let (connection, _receivers) = SseConnection::channel();
        connections.register(id.clone(), connection);

        for i in 0..CHANNEL_CAPACITY {
            connections.enqueue(&id, JsonRpcRequest::new(i as i64, "ping", json!({}))).unwrap();
        }
        let err = connections.enqueue(&id, JsonRpcRequest::new(0, "ping", json!({}))).unwrap_err();
        assert!(matches!(err, McpError::InternalError(_)));
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let connections = SseConnections::new();
        let id = SessionId::new("gone");
        let (connection, receivers) = SseConnection::channel();
        connections.register(id.clone(), connection);
        drop(receivers);

        let err = connections.enqueue(&id, JsonRpcRequest::new(1, "ping", json!({}))).unwrap_err();
        assert!(matches!(err, McpError::SessionNotFound(_)));
    }
}
