//! Service keys: the credential bundle describing how to reach a destination.
//!
//! A key file may put the system URL at the top level (`url`, `client`) or
//! under an `abap` object (`abap.url`, `abap.client`). OAuth client credentials
//! live under `uaa`.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::auth::error::AuthError;
use crate::auth::secret::SecretString;

/// OAuth client credentials from a service key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UaaCredentials {
    pub url: String,
    pub clientid: String,
    pub clientsecret: SecretString,
}

/// Resolved service key for one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceKey {
    pub url: String,
    pub client: Option<String>,
    pub uaa: Option<UaaCredentials>,
}

#[derive(Debug, Deserialize)]
struct RawServiceKey {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    client: Option<String>,
    #[serde(default)]
    abap: Option<RawAbapSection>,
    #[serde(default)]
    uaa: Option<UaaCredentials>,
}

#[derive(Debug, Deserialize)]
struct RawAbapSection {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    client: Option<String>,
}

impl ServiceKey {
    /// Parse a service key document for `destination`.
    pub fn from_json(destination: &str, json: &str) -> Result<Self, AuthError> {
        let raw: RawServiceKey = serde_json::from_str(json)
            .map_err(|e| AuthError::invalid_key(destination, e.to_string()))?;

        let (abap_url, abap_client) = match raw.abap {
            Some(section) => (section.url, section.client),
            None => (None, None),
        };

        let url = raw
            .url
            .or(abap_url)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AuthError::invalid_key(destination, "missing system url"))?;

        let parsed = url::Url::parse(&url)
            .map_err(|e| AuthError::invalid_key(destination, format!("invalid url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AuthError::invalid_key(destination, "url must use http or https"));
        }

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client: raw.client.or(abap_client).filter(|c| !c.trim().is_empty()),
            uaa: raw.uaa,
        })
    }
}

/// Destination names map to file names, so only a conservative alphabet is allowed.
pub fn is_valid_destination(destination: &str) -> bool {
    !destination.is_empty()
        && destination.len() <= 128
        && destination.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !destination.starts_with('.')
}

/// Source of service keys
#[async_trait]
pub trait ServiceKeyStore: Send + Sync {
    /// Look up the key for `destination`; `Ok(None)` when none exists.
    async fn get_service_key(&self, destination: &str) -> Result<Option<ServiceKey>, AuthError>;
}

/// Reads `<dir>/<destination>.json`
#[derive(Debug, Clone)]
pub struct FileServiceKeyStore {
    dir: PathBuf,
}

impl FileServiceKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, destination: &str) -> PathBuf {
        self.dir.join(format!("{}.json", destination))
    }
}

#[async_trait]
impl ServiceKeyStore for FileServiceKeyStore {
    async fn get_service_key(&self, destination: &str) -> Result<Option<ServiceKey>, AuthError> {
        if !is_valid_destination(destination) {
            return Err(AuthError::InvalidDestination(destination.to_string()));
        }

        let path = self.path_for(destination);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(destination = %destination, path = %path.display(), "No service key file");
                return Ok(None);
            }
            Err(e) => return Err(AuthError::Io(e)),
        };

        ServiceKey::from_json(destination, &contents).map(Some)
    }
}

/// Keys held in memory, keyed by destination
#[derive(Debug, Default)]
pub struct InMemoryServiceKeyStore {
    keys: DashMap<String, ServiceKey>,
}

impl InMemoryServiceKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, destination: impl Into<String>, key: ServiceKey) {
        self.keys.insert(destination.into(), key);
    }
}

#[async_trait]
impl ServiceKeyStore for InMemoryServiceKeyStore {
    async fn get_service_key(&self, destination: &str) -> Result<Option<ServiceKey>, AuthError> {
        Ok(self.keys.get(destination).map(|k| k.value().clone()))
    }
}
