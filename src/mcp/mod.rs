//! MCP (Model Context Protocol) Server Implementation
//!
//! Protocol handling, session tracking and the stdio, SSE and streamable HTTP
//! transports that put ABAP ADT tools in front of MCP clients.

pub mod connection;
pub mod context;
pub mod error;
pub mod events;
pub mod handler;
pub mod http;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sse;
pub mod stdio;
pub mod streamable_http;
pub mod tool_registry;
pub mod tools;
pub mod transport;
pub mod transport_common;

pub use connection::{SharedSseConnections, SseConnection, SseConnections};
pub use context::ConnectionContext;
pub use error::McpError;
pub use events::Listeners;
pub use handler::{parse_request, ProtocolHandler};
pub use protocol::*;
pub use server::{normalize_output, McpServer};
pub use session::{
    create_session_manager, AbapSession, Session, SessionId, SessionManager, SessionMetadata,
    SessionOrigin, SharedSessionManager,
};
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;
pub use tool_registry::{
    HandlerKind, LegacyCall, ToolContent, ToolContext, ToolEntry, ToolGroup, ToolOutput,
    ToolRegistry,
};
pub use transport::{BindScope, Transport, TransportEvent};
pub use transport_common::{ConnectionSource, TransportServices};
