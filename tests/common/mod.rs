//! Common test utilities for all integration tests.
//!
//! Builds transport services for both provider modes, a counting token
//! provider and a small tool registry that talks to a mocked backend.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use adt_mcp_gateway::auth::{
    AuthBrokerFactory, AuthError, BrokerDependencies, InMemoryServiceKeyStore, InMemoryTokenStore,
    ServiceKey, TokenProvider, TokenSet,
};
use adt_mcp_gateway::connection::{
    BackendConnection, BackendRequest, ConnectionProvider, HttpConnectionFactory,
    LocalConnectionProvider, RemoteConnectionProvider, SapHeaderValidator,
};
use adt_mcp_gateway::mcp::protocol::Tool;
use adt_mcp_gateway::mcp::{
    McpError, McpServer, ProtocolHandler, SessionManager, ToolContext, ToolGroup, ToolOutput,
    ToolRegistry, TransportServices,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

pub const ECHO_PATH: &str = "/sap/bc/adt/echo";

/// Token provider handing out `token-0`, `token-1`, ...
#[derive(Default)]
pub struct CountingTokenProvider {
    calls: AtomicUsize,
}

impl CountingTokenProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokenProvider {
    async fn fetch_token(
        &self,
        _service_key: &ServiceKey,
        _refresh_token: Option<&str>,
    ) -> Result<TokenSet, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenSet::new(format!("token-{}", n))
            .with_refresh_token("refresh")
            .expiring_at(Utc::now() + Duration::hours(1)))
    }
}

/// Token provider that never answers, holding callers mid-provisioning
pub struct StalledTokenProvider;

#[async_trait]
impl TokenProvider for StalledTokenProvider {
    async fn fetch_token(
        &self,
        _service_key: &ServiceKey,
        _refresh_token: Option<&str>,
    ) -> Result<TokenSet, AuthError> {
        std::future::pending().await
    }
}

pub fn service_key(url: &str) -> ServiceKey {
    ServiceKey { url: url.to_string(), client: Some("100".to_string()), uaa: None }
}

/// Broker dependencies with one service key per `(destination, url)` pair
pub fn broker_deps(keys: &[(&str, &str)], provider: Arc<dyn TokenProvider>) -> BrokerDependencies {
    let store = InMemoryServiceKeyStore::new();
    for (destination, url) in keys {
        store.insert(*destination, service_key(url));
    }
    BrokerDependencies {
        service_keys: Arc::new(store),
        tokens: Arc::new(InMemoryTokenStore::new()),
        provider: Some(provider),
        refresh_skew: Duration::seconds(30),
    }
}

/// Tool registry with a single `Echo` tool returning the backend's body
pub fn echo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register_contextual(
            ToolGroup::ReadOnly,
            Tool::new("Echo", "Return the backend echo body", json!({"type": "object"})),
            |ctx: ToolContext, _args: Value| async move {
                let response = ctx.connection.request(BackendRequest::get(ECHO_PATH)).await?;
                Ok::<_, McpError>(ToolOutput::text(response.body))
            },
        )
        .expect("register echo tool");
    registry
}

/// Adds a `Boom` tool that panics when called
pub fn with_panicking_tool(mut registry: ToolRegistry) -> ToolRegistry {
    registry
        .register_contextual(
            ToolGroup::ReadOnly,
            Tool::new("Boom", "Panics inside the handler", json!({"type": "object"})),
            |_ctx: ToolContext, args: Value| async move {
                let Some(reason) = args.get("reason") else {
                    panic!("tool handler blew up");
                };
                Ok::<_, McpError>(ToolOutput::text(reason.to_string()))
            },
        )
        .expect("register boom tool");
    registry
}

fn services(
    registry: ToolRegistry,
    sessions: Arc<SessionManager>,
    provider: Arc<dyn ConnectionProvider>,
    brokers: Option<Arc<AuthBrokerFactory>>,
    default_destination: Option<&str>,
) -> TransportServices {
    let mut server = McpServer::new(
        Arc::new(registry),
        sessions.clone(),
        provider.clone(),
        Arc::new(HttpConnectionFactory::from_client(reqwest::Client::new())),
    );
    if let Some(brokers) = &brokers {
        server = server.with_brokers(brokers.clone());
    }
    TransportServices {
        handler: ProtocolHandler::new(Arc::new(server), sessions.clone()),
        sessions,
        provider,
        brokers,
        default_destination: default_destination.map(str::to_string),
    }
}

/// Services for header-provisioned (remote) connections
pub fn remote_services(registry: ToolRegistry) -> TransportServices {
    let provider = Arc::new(RemoteConnectionProvider::new(Arc::new(SapHeaderValidator)));
    services(registry, Arc::new(SessionManager::new()), provider, None, None)
}

/// Services for destination-provisioned (local) connections
pub fn local_services(
    registry: ToolRegistry,
    deps: BrokerDependencies,
    default_destination: Option<&str>,
) -> TransportServices {
    let sessions = Arc::new(SessionManager::new());
    let brokers = Arc::new(AuthBrokerFactory::new(deps));
    let provider = Arc::new(LocalConnectionProvider::new(brokers.clone(), sessions.clone()));
    services(registry, sessions, provider, Some(brokers), default_destination)
}

pub fn tools_call(id: i64, name: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": {}}
    })
    .to_string()
}
