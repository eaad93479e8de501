//! Per session and destination token broker.
//!
//! A broker loads the destination's service key once, then hands out the
//! current token, refreshing it through the token provider when it is stale.
//! A failed refresh falls back to the token already held; only the absence of
//! any token is an error.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::error::AuthError;
use crate::auth::service_key::{ServiceKey, ServiceKeyStore};
use crate::auth::token_provider::TokenProvider;
use crate::auth::token_store::{SessionTokenStore, TokenSet};

/// Collaborators every broker is wired with
#[derive(Clone)]
pub struct BrokerDependencies {
    pub service_keys: Arc<dyn ServiceKeyStore>,
    pub tokens: Arc<dyn SessionTokenStore>,
    pub provider: Option<Arc<dyn TokenProvider>>,
    pub refresh_skew: Duration,
}

pub struct AuthBroker {
    session_id: String,
    destination: String,
    service_key: ServiceKey,
    tokens: Arc<dyn SessionTokenStore>,
    provider: Option<Arc<dyn TokenProvider>>,
    refresh_skew: Duration,
    current: Mutex<Option<TokenSet>>,
}

impl std::fmt::Debug for AuthBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBroker")
            .field("session_id", &self.session_id)
            .field("destination", &self.destination)
            .field("url", &self.service_key.url)
            .finish_non_exhaustive()
    }
}

impl AuthBroker {
    /// Build a broker, failing when the destination has no service key.
    pub async fn connect(
        session_id: &str,
        destination: &str,
        deps: &BrokerDependencies,
    ) -> Result<Self, AuthError> {
        let service_key = deps
            .service_keys
            .get_service_key(destination)
            .await?
            .ok_or_else(|| AuthError::ServiceKeyNotFound(destination.to_string()))?;

        debug!(session_id = %session_id, destination = %destination, "Created auth broker");

        Ok(Self {
            session_id: session_id.to_string(),
            destination: destination.to_string(),
            service_key,
            tokens: deps.tokens.clone(),
            provider: deps.provider.clone(),
            refresh_skew: deps.refresh_skew,
            current: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.service_key
    }

    /// Current token set, refreshed first when stale or missing.
    pub async fn get_tokens(&self) -> Result<TokenSet, AuthError> {
        let mut current = self.current.lock().await;

        if current.is_none() {
            *current = self.tokens.load(&self.destination).await?;
        }

        let needs_refresh = current.as_ref().map_or(true, |t| t.is_stale(self.refresh_skew));
        if needs_refresh {
            let fetched = self.fetch(current.as_ref()).await;
            match fetched {
                Ok(fresh) => {
                    self.persist(&fresh).await;
                    *current = Some(fresh);
                }
                Err(e) if current.is_some() => {
                    warn!(
                        destination = %self.destination,
                        error = %e,
                        "Token refresh failed, continuing with held token"
                    );
                }
                Err(e) => {
                    warn!(destination = %self.destination, error = %e, "No token and refresh failed");
                    return Err(AuthError::NoToken(self.destination.clone()));
                }
            }
        }

        current.clone().ok_or_else(|| AuthError::NoToken(self.destination.clone()))
    }

    /// Current access token
    pub async fn get_token(&self) -> Result<String, AuthError> {
        let tokens = self.get_tokens().await?;
        Ok(tokens.access_token.expose_secret().to_string())
    }

    /// Force a refresh regardless of expiry. Used after the backend rejects a token.
    pub async fn refresh_token(&self) -> Result<TokenSet, AuthError> {
        let mut current = self.current.lock().await;
        let fresh = self.fetch(current.as_ref()).await?;
        self.persist(&fresh).await;
        *current = Some(fresh.clone());
        debug!(destination = %self.destination, "Forced token refresh succeeded");
        Ok(fresh)
    }

    async fn fetch(&self, held: Option<&TokenSet>) -> Result<TokenSet, AuthError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| AuthError::Refresh("no token provider configured".to_string()))?;

        let refresh = held.and_then(|t| t.refresh_token.as_ref()).map(|t| t.expose_secret());
        let mut fresh = provider.fetch_token(&self.service_key, refresh).await?;

        // Providers may omit the refresh token on a refresh grant
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = held.and_then(|t| t.refresh_token.clone());
        }
        Ok(fresh)
    }

    async fn persist(&self, tokens: &TokenSet) {
        if let Err(e) = self.tokens.save(&self.destination, tokens).await {
            warn!(destination = %self.destination, error = %e, "Failed to persist token set");
        }
    }
}
