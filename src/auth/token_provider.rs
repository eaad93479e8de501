//! OAuth token acquisition against the service key's UAA endpoint.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::auth::error::AuthError;
use crate::auth::service_key::ServiceKey;
use crate::auth::token_store::TokenSet;

/// Obtains fresh tokens for a destination
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Use `refresh_token` when given, otherwise the client credentials grant.
    async fn fetch_token(
        &self,
        service_key: &ServiceKey,
        refresh_token: Option<&str>,
    ) -> Result<TokenSet, AuthError>;
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Token provider posting to `<uaa.url>/oauth/token`
#[derive(Debug, Clone)]
pub struct OAuthTokenProvider {
    client: reqwest::Client,
}

impl OAuthTokenProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    #[instrument(
        skip(self, service_key, refresh_token),
        fields(grant = tracing::field::Empty),
        name = "oauth_fetch_token"
    )]
    async fn fetch_token(
        &self,
        service_key: &ServiceKey,
        refresh_token: Option<&str>,
    ) -> Result<TokenSet, AuthError> {
        let uaa = service_key
            .uaa
            .as_ref()
            .ok_or_else(|| AuthError::Refresh("service key has no uaa credentials".to_string()))?;

        let token_url = format!("{}/oauth/token", uaa.url.trim_end_matches('/'));
        let form: Vec<(&str, &str)> = match refresh_token {
            Some(token) => vec![("grant_type", "refresh_token"), ("refresh_token", token)],
            None => vec![("grant_type", "client_credentials")],
        };
        tracing::Span::current().record("grant", form[0].1);

        let response = self
            .client
            .post(&token_url)
            .basic_auth(&uaa.clientid, Some(uaa.clientsecret.expose_secret()))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Refresh(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Refresh(format!("token endpoint returned {}", status)));
        }

        let body: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Refresh(format!("invalid token response: {}", e)))?;

        debug!(expires_in = ?body.expires_in, "Obtained token from UAA");

        let mut tokens = TokenSet::new(body.access_token);
        if let Some(refresh) = body.refresh_token {
            tokens = tokens.with_refresh_token(refresh);
        }
        if let Some(seconds) = body.expires_in {
            tokens = tokens.expiring_at(Utc::now() + Duration::seconds(seconds));
        }
        Ok(tokens)
    }
}
