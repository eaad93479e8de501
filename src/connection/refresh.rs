//! Connection wrapper that survives one expired token.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::auth::AuthBroker;
use crate::connection::backend::{
    BackendConnection, BackendError, BackendRequest, BackendResponse, ConnectionFactory,
};
use crate::connection::params::{AuthDescriptor, ConnectionParams, ConnectionParamsUpdate};
use crate::connection::provider::ConnectionProvider;
use crate::mcp::session::SessionId;

/// On a 401 the broker is asked for a new token, the connection is rebuilt,
/// the new parameters are written back through the provider and the request
/// is retried once.
pub struct RefreshingConnection {
    session_id: SessionId,
    broker: Arc<AuthBroker>,
    factory: Arc<dyn ConnectionFactory>,
    provider: Arc<dyn ConnectionProvider>,
    state: RwLock<(ConnectionParams, Arc<dyn BackendConnection>)>,
}

impl RefreshingConnection {
    pub fn new(
        session_id: SessionId,
        params: ConnectionParams,
        inner: Arc<dyn BackendConnection>,
        broker: Arc<AuthBroker>,
        factory: Arc<dyn ConnectionFactory>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Self {
        Self { session_id, broker, factory, provider, state: RwLock::new((params, inner)) }
    }

    fn current(&self) -> Option<(ConnectionParams, Arc<dyn BackendConnection>)> {
        self.state.read().ok().map(|s| (s.0.clone(), s.1.clone()))
    }

    async fn refresh(
        &self,
        params: &ConnectionParams,
        stale: &Arc<dyn BackendConnection>,
    ) -> Result<Arc<dyn BackendConnection>, BackendError> {
        let tokens =
            self.broker.refresh_token().await.map_err(|e| BackendError::Refresh(e.to_string()))?;
        let auth = AuthDescriptor::jwt(tokens.access_token, tokens.refresh_token)
            .map_err(|e| BackendError::Refresh(e.to_string()))?;

        let update = ConnectionParamsUpdate::auth(auth);
        let refreshed = params.apply(&update);

        // Keep every cookie and the CSRF token across the rebuild
        let connection = self.factory.create(&refreshed, &stale.state_tokens())?;

        if let Ok(mut state) = self.state.write() {
            *state = (refreshed, connection.clone());
        }

        if let Err(e) = self.provider.update_connection_params(&self.session_id, update).await {
            warn!(session_id = %self.session_id, error = %e, "Failed to store refreshed connection params");
        }

        info!(
            session_id = %self.session_id,
            destination = %self.broker.destination(),
            "Refreshed expired backend token"
        );
        Ok(connection)
    }
}

#[async_trait]
impl BackendConnection for RefreshingConnection {
    async fn request(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let (params, connection) = self
            .current()
            .ok_or_else(|| BackendError::InvalidRequest("connection state unavailable".into()))?;

        match connection.request(request.clone()).await {
            Err(BackendError::Unauthorized) => {
                let connection = self.refresh(&params, &connection).await?;
                connection.request(request).await
            }
            other => other,
        }
    }

    fn state_tokens(&self) -> Vec<String> {
        self.current().map(|(_, c)| c.state_tokens()).unwrap_or_default()
    }
}
