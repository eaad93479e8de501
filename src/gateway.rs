//! Gateway assembly and lifecycle.
//!
//! Builds the session manager, broker factory, connection provider, tool
//! registry and protocol handler once, wires them into the configured
//! transport, and tears everything down on shutdown.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{
    AuthBrokerFactory, BrokerDependencies, FileServiceKeyStore, FileTokenStore,
    OAuthTokenProvider,
};
use crate::config::{GatewayConfig, TransportKind};
use crate::connection::{
    validate_bind_scope, ConnectionProvider, HttpConnectionFactory, LocalConnectionProvider,
    ProviderMode, RemoteConnectionProvider, SapHeaderValidator,
};
use crate::errors::{Error, Result};
use crate::mcp::handler::ProtocolHandler;
use crate::mcp::server::McpServer;
use crate::mcp::session::SessionManager;
use crate::mcp::sse::SseTransport;
use crate::mcp::stdio::StdioTransport;
use crate::mcp::streamable_http::StreamableHttpTransport;
use crate::mcp::tools::builtin_registry;
use crate::mcp::transport::Transport;
use crate::mcp::transport_common::TransportServices;

pub struct GatewayServer {
    mode: ProviderMode,
    sessions: Arc<SessionManager>,
    brokers: Option<Arc<AuthBrokerFactory>>,
    transport: Arc<dyn Transport>,
}

impl GatewayServer {
    /// Validate the configuration and wire every component.
    ///
    /// Fails with [`Error::ConfigurationMismatch`] when the transport's bind
    /// scope and the provider mode disagree.
    pub fn build(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let mode = config.provider_mode()?;
        validate_bind_scope(config.transport.bind_scope(), mode)?;

        let sessions = Arc::new(SessionManager::new());
        let (provider, brokers) = Self::provider(&config, mode, &sessions)?;

        let registry = builtin_registry(&config.tools.groups)
            .map_err(|e| Error::internal(format!("Failed to register tools: {}", e)))?;
        let connections = HttpConnectionFactory::new(config.backend.timeout())
            .map_err(|e| Error::internal(format!("Failed to build backend client: {}", e)))?;

        let mut server =
            McpServer::new(Arc::new(registry), sessions.clone(), provider.clone(), Arc::new(connections));
        if let Some(brokers) = &brokers {
            server = server.with_brokers(brokers.clone());
        }
        info!(tools = server.registry().len(), mode = %mode, "MCP server ready");

        let services = TransportServices {
            handler: ProtocolHandler::new(Arc::new(server), sessions.clone()),
            sessions: sessions.clone(),
            provider,
            brokers: brokers.clone(),
            default_destination: config.auth.destination.clone(),
        };

        let transport: Arc<dyn Transport> = match config.transport.kind {
            TransportKind::Stdio => Arc::new(StdioTransport::new(services)),
            TransportKind::Sse => Arc::new(SseTransport::new(services, config.transport.clone())),
            TransportKind::StreamableHttp => {
                Arc::new(StreamableHttpTransport::new(services, config.transport.clone()))
            }
        };

        Ok(Self { mode, sessions, brokers, transport })
    }

    fn provider(
        config: &GatewayConfig,
        mode: ProviderMode,
        sessions: &Arc<SessionManager>,
    ) -> Result<(Arc<dyn ConnectionProvider>, Option<Arc<AuthBrokerFactory>>)> {
        match mode {
            ProviderMode::Local => {
                let http = reqwest::Client::builder()
                    .timeout(config.backend.timeout())
                    .build()
                    .map_err(|e| Error::internal(format!("Failed to build token client: {}", e)))?;
                let deps = BrokerDependencies {
                    service_keys: Arc::new(FileServiceKeyStore::new(&config.auth.service_keys_dir)),
                    tokens: Arc::new(FileTokenStore::new(&config.auth.sessions_dir)),
                    provider: Some(Arc::new(OAuthTokenProvider::new(http))),
                    refresh_skew: config.auth.refresh_skew(),
                };
                let brokers = Arc::new(AuthBrokerFactory::new(deps));
                let provider = LocalConnectionProvider::new(brokers.clone(), sessions.clone());
                Ok((Arc::new(provider), Some(brokers)))
            }
            ProviderMode::Remote => {
                let provider = RemoteConnectionProvider::new(Arc::new(SapHeaderValidator));
                Ok((Arc::new(provider), None))
            }
        }
    }

    pub fn mode(&self) -> ProviderMode {
        self.mode
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn brokers(&self) -> Option<&Arc<AuthBrokerFactory>> {
        self.brokers.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Serve until ctrl-c, or until the transport closes on its own.
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Shutdown signal listener failed");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.transport.start().await?;
        info!(transport = %self.transport.kind(), mode = %self.mode, "Gateway started");

        tokio::select! {
            _ = shutdown => info!("Shutdown signal received"),
            _ = self.transport.closed() => info!("Transport closed"),
        }

        self.shutdown().await
    }

    /// Stop the transport and drop every session and broker
    pub async fn shutdown(&self) -> Result<()> {
        self.transport.stop().await?;
        let sessions = self.sessions.clear_all();
        if let Some(brokers) = &self.brokers {
            brokers.clear_all();
        }
        info!(sessions, "Gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthMode;

    #[test]
    fn test_stdio_defaults_to_local_mode() {
        let gateway = GatewayServer::build(GatewayConfig::default()).unwrap();
        assert_eq!(gateway.mode(), ProviderMode::Local);
        assert!(gateway.brokers().is_some());
        assert_eq!(gateway.transport().kind(), TransportKind::Stdio);
    }

    #[test]
    fn test_public_bind_defaults_to_remote_mode() {
        let mut config = GatewayConfig::default();
        config.transport.kind = TransportKind::StreamableHttp;
        config.transport.host = "0.0.0.0".to_string();

        let gateway = GatewayServer::build(config).unwrap();
        assert_eq!(gateway.mode(), ProviderMode::Remote);
        assert!(gateway.brokers().is_none());
    }

    #[test]
    fn test_mismatched_mode_is_fatal() {
        let mut config = GatewayConfig::default();
        config.transport.kind = TransportKind::Sse;
        config.transport.host = "0.0.0.0".to_string();
        config.auth.mode = AuthMode::Local;

        let err = GatewayServer::build(config).err().unwrap();
        assert!(err.is_configuration_mismatch());

        let mut config = GatewayConfig::default();
        config.auth.mode = AuthMode::Remote;
        let err = GatewayServer::build(config).err().unwrap();
        assert!(err.is_configuration_mismatch());
    }
}
