//! Connection providers resolve a request into connection parameters.
//!
//! Exactly one provider mode is active per gateway instance. Local mode works
//! from service keys and broker-managed tokens and belongs to loopback-only
//! transports. Remote mode reads everything from request headers and belongs to
//! transports listening on every interface.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::AuthBrokerFactory;
use crate::connection::headers::HeaderValidator;
use crate::connection::params::{AuthDescriptor, ConnectionParams, ConnectionParamsUpdate};
use crate::errors::{Error, Result};
use crate::mcp::error::McpError;
use crate::mcp::session::{SessionId, SessionManager};
use crate::mcp::transport::BindScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Local,
    Remote,
}

impl ProviderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Local => "local",
            ProviderMode::Remote => "remote",
        }
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fails with `ConfigurationMismatch` unless the mode suits the bind scope.
pub fn validate_bind_scope(scope: BindScope, mode: ProviderMode) -> Result<()> {
    match (scope, mode) {
        (BindScope::Loopback, ProviderMode::Local)
        | (BindScope::AnyInterface, ProviderMode::Remote) => Ok(()),
        (BindScope::Loopback, ProviderMode::Remote) => Err(Error::mismatch(
            "loopback transports use local auth mode; remote header auth needs a transport bound to all interfaces",
        )),
        (BindScope::AnyInterface, ProviderMode::Local) => Err(Error::mismatch(
            "transports bound to all interfaces use remote header auth; local service keys are limited to loopback",
        )),
    }
}

/// What a caller knows about the connection it wants
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub session_id: SessionId,
    pub destination: Option<String>,
    pub headers: Option<HeaderMap>,
}

impl ConnectionRequest {
    pub fn for_destination(session_id: SessionId, destination: impl Into<String>) -> Self {
        Self { session_id, destination: Some(destination.into()), headers: None }
    }

    pub fn for_headers(session_id: SessionId, headers: HeaderMap) -> Self {
        Self { session_id, destination: None, headers: Some(headers) }
    }
}

#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    fn mode(&self) -> ProviderMode;

    async fn get_connection_params(
        &self,
        request: &ConnectionRequest,
    ) -> std::result::Result<ConnectionParams, McpError>;

    async fn update_connection_params(
        &self,
        session_id: &SessionId,
        update: ConnectionParamsUpdate,
    ) -> std::result::Result<(), McpError>;
}

pub type SharedConnectionProvider = Arc<dyn ConnectionProvider>;

/// Service key and broker backed provider
pub struct LocalConnectionProvider {
    brokers: Arc<AuthBrokerFactory>,
    sessions: Arc<SessionManager>,
}

impl LocalConnectionProvider {
    pub fn new(brokers: Arc<AuthBrokerFactory>, sessions: Arc<SessionManager>) -> Self {
        Self { brokers, sessions }
    }
}

#[async_trait]
impl ConnectionProvider for LocalConnectionProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::Local
    }

    async fn get_connection_params(
        &self,
        request: &ConnectionRequest,
    ) -> std::result::Result<ConnectionParams, McpError> {
        let destination = request
            .destination
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(McpError::DestinationRequired)?;

        let broker =
            self.brokers.get_or_create_broker(request.session_id.as_str(), destination).await?;
        let tokens = broker.get_tokens().await?;
        let service_key = broker.service_key();

        let auth = AuthDescriptor::jwt(tokens.access_token, tokens.refresh_token)?;
        debug!(
            session_id = %request.session_id,
            destination = %destination,
            "Resolved connection params from service key"
        );
        Ok(ConnectionParams::new(service_key.url.clone(), auth)
            .with_client(service_key.client.clone()))
    }

    async fn update_connection_params(
        &self,
        session_id: &SessionId,
        update: ConnectionParamsUpdate,
    ) -> std::result::Result<(), McpError> {
        let Some(current) = self.sessions.connection_params(session_id) else {
            debug!(session_id = %session_id, "No stored connection params to update");
            return Ok(());
        };
        self.sessions.update_connection_params(session_id, current.apply(&update))
    }
}

/// Header-only provider; holds no state between requests
pub struct RemoteConnectionProvider {
    validator: Arc<dyn HeaderValidator>,
}

impl RemoteConnectionProvider {
    pub fn new(validator: Arc<dyn HeaderValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl ConnectionProvider for RemoteConnectionProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::Remote
    }

    async fn get_connection_params(
        &self,
        request: &ConnectionRequest,
    ) -> std::result::Result<ConnectionParams, McpError> {
        let headers = request.headers.as_ref().ok_or(McpError::HeadersRequired)?;
        self.validator.validate(headers)
    }

    async fn update_connection_params(
        &self,
        session_id: &SessionId,
        _update: ConnectionParamsUpdate,
    ) -> std::result::Result<(), McpError> {
        debug!(session_id = %session_id, "Remote mode keeps no connection state, ignoring update");
        Ok(())
    }
}
