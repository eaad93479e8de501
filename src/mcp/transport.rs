//! Transport contract shared by the stdio, SSE and streamable HTTP adapters.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::config::TransportKind;
use crate::connection::ProviderMode;
use crate::errors::Result;
use crate::mcp::error::McpError;
use crate::mcp::events::Listeners;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::mcp::session::SessionId;

/// Which network interfaces a transport is reachable from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindScope {
    Loopback,
    AnyInterface,
}

impl BindScope {
    /// `localhost` and loopback addresses are `Loopback`; everything else is not.
    pub fn from_host(host: &str) -> Self {
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        if host.eq_ignore_ascii_case("localhost") {
            return BindScope::Loopback;
        }
        match host.parse::<IpAddr>() {
            Ok(ip) if ip.is_loopback() => BindScope::Loopback,
            _ => BindScope::AnyInterface,
        }
    }

    pub fn required_provider_mode(&self) -> ProviderMode {
        match self {
            BindScope::Loopback => ProviderMode::Local,
            BindScope::AnyInterface => ProviderMode::Remote,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    SessionCreated(SessionId),
    SessionClosed(SessionId),
    Message { session_id: SessionId, request: JsonRpcRequest },
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn bind_scope(&self) -> BindScope;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Deliver a response to the session's client
    async fn send(&self, session_id: &SessionId, message: JsonRpcResponse)
        -> std::result::Result<(), McpError>;

    fn events(&self) -> &Listeners<TransportEvent>;

    /// Resolves once the transport has stopped serving
    async fn closed(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_scope_from_host() {
        for host in ["127.0.0.1", "localhost", "LOCALHOST", "::1", "[::1]", "127.0.0.2"] {
            assert_eq!(BindScope::from_host(host), BindScope::Loopback, "{}", host);
        }
        for host in ["0.0.0.0", "::", "10.0.0.5", "gateway.example.com"] {
            assert_eq!(BindScope::from_host(host), BindScope::AnyInterface, "{}", host);
        }
    }

    #[test]
    fn test_required_provider_mode() {
        assert_eq!(BindScope::Loopback.required_provider_mode(), ProviderMode::Local);
        assert_eq!(BindScope::AnyInterface.required_provider_mode(), ProviderMode::Remote);
    }
}
