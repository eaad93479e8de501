//! Token sets and where they are kept between broker lookups.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::error::AuthError;
use crate::auth::secret::SecretString;
use crate::auth::service_key::is_valid_destination;

/// Access token with optional refresh token and expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<SecretString>) -> Self {
        Self { access_token: access_token.into(), refresh_token: None, expires_at: None }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<SecretString>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Tokens without an expiry are never considered stale.
    pub fn is_stale(&self, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + skew >= expires_at,
            None => false,
        }
    }
}

/// On-disk representation; secrets are written in clear to the sessions directory
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedTokenSet {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl From<&TokenSet> for PersistedTokenSet {
    fn from(tokens: &TokenSet) -> Self {
        Self {
            access_token: tokens.access_token.expose_secret().to_string(),
            refresh_token: tokens.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
            expires_at: tokens.expires_at,
        }
    }
}

impl From<PersistedTokenSet> for TokenSet {
    fn from(persisted: PersistedTokenSet) -> Self {
        Self {
            access_token: SecretString::from(persisted.access_token),
            refresh_token: persisted.refresh_token.map(SecretString::from),
            expires_at: persisted.expires_at,
        }
    }
}

/// Persistence for per-destination token sets
#[async_trait]
pub trait SessionTokenStore: Send + Sync {
    async fn load(&self, destination: &str) -> Result<Option<TokenSet>, AuthError>;
    async fn save(&self, destination: &str, tokens: &TokenSet) -> Result<(), AuthError>;
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: DashMap<String, TokenSet>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionTokenStore for InMemoryTokenStore {
    async fn load(&self, destination: &str) -> Result<Option<TokenSet>, AuthError> {
        Ok(self.tokens.get(destination).map(|t| t.value().clone()))
    }

    async fn save(&self, destination: &str, tokens: &TokenSet) -> Result<(), AuthError> {
        self.tokens.insert(destination.to_string(), tokens.clone());
        Ok(())
    }
}

/// Persists token sets as `<dir>/<destination>.json`
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, destination: &str) -> Result<PathBuf, AuthError> {
        if !is_valid_destination(destination) {
            return Err(AuthError::InvalidDestination(destination.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", destination)))
    }
}

#[async_trait]
impl SessionTokenStore for FileTokenStore {
    async fn load(&self, destination: &str) -> Result<Option<TokenSet>, AuthError> {
        let path = self.path_for(destination)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Io(e)),
        };

        let persisted: PersistedTokenSet = serde_json::from_str(&contents)
            .map_err(|e| AuthError::Store(format!("{}: {}", path.display(), e)))?;
        Ok(Some(persisted.into()))
    }

    async fn save(&self, destination: &str, tokens: &TokenSet) -> Result<(), AuthError> {
        let path = self.path_for(destination)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(&PersistedTokenSet::from(tokens))?;
        tokio::fs::write(&path, json).await?;

        debug!(destination = %destination, path = %path.display(), "Persisted token set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_without_expiry_is_fresh() {
        assert!(!TokenSet::new("abc").is_stale(Duration::seconds(60)));
    }

    #[test]
    fn test_token_stale_within_skew() {
        let tokens = TokenSet::new("abc").expiring_at(Utc::now() + Duration::seconds(30));
        assert!(tokens.is_stale(Duration::seconds(60)));
        assert!(!tokens.is_stale(Duration::seconds(0)));
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryTokenStore::new();
        assert!(store.load("DEV").await.unwrap().is_none());

        store.save("DEV", &TokenSet::new("abc").with_refresh_token("r1")).await.unwrap();
        let loaded = store.load("DEV").await.unwrap().unwrap();
        assert_eq!(loaded.access_token.expose_secret(), "abc");
    }

    #[tokio::test]
    async fn test_file_store_persists_secrets_in_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("sessions"));

        let expires_at = Utc::now() + Duration::hours(1);
        let tokens = TokenSet::new("access-1").with_refresh_token("refresh-1").expiring_at(expires_at);
        store.save("DEV", &tokens).await.unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("sessions/DEV.json")).await.unwrap();
        assert!(raw.contains("access-1"));
        assert!(!raw.contains("REDACTED"));

        let loaded = store.load("DEV").await.unwrap().unwrap();
        assert_eq!(loaded, tokens);
    }

    #[tokio::test]
    async fn test_file_store_rejects_bad_destination() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        assert!(store.load("../x").await.is_err());
    }
}
