//! Connection parameters: where a backend lives and how to authenticate to it.

use crate::auth::SecretString;
use crate::mcp::error::McpError;

/// Authentication material; each variant owns exactly the fields it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDescriptor {
    Jwt { token: SecretString, refresh_token: Option<SecretString> },
    Basic { username: String, password: SecretString },
}

impl AuthDescriptor {
    pub fn jwt(
        token: impl Into<SecretString>,
        refresh_token: Option<SecretString>,
    ) -> Result<Self, McpError> {
        let token = token.into();
        if token.is_empty() {
            return Err(McpError::InvalidParams("JWT token must not be empty".to_string()));
        }
        let refresh_token = refresh_token.filter(|t| !t.is_empty());
        Ok(Self::Jwt { token, refresh_token })
    }

    pub fn basic(
        username: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Result<Self, McpError> {
        let username = username.into();
        let password = password.into();
        if username.trim().is_empty() {
            return Err(McpError::InvalidParams("username must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(McpError::InvalidParams("password must not be empty".to_string()));
        }
        Ok(Self::Basic { username, password })
    }

    /// `jwt` or `basic`
    pub fn kind(&self) -> &'static str {
        match self {
            AuthDescriptor::Jwt { .. } => "jwt",
            AuthDescriptor::Basic { .. } => "basic",
        }
    }
}

/// Immutable snapshot of a resolved backend connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub url: String,
    pub auth: AuthDescriptor,
    pub client: Option<String>,
}

impl ConnectionParams {
    pub fn new(url: impl Into<String>, auth: AuthDescriptor) -> Self {
        Self { url: url.into().trim_end_matches('/').to_string(), auth, client: None }
    }

    pub fn with_client(mut self, client: Option<String>) -> Self {
        self.client = client.filter(|c| !c.trim().is_empty());
        self
    }

    /// A new snapshot with the update's fields laid over this one.
    pub fn apply(&self, update: &ConnectionParamsUpdate) -> ConnectionParams {
        ConnectionParams {
            url: update.url.clone().unwrap_or_else(|| self.url.clone()),
            auth: update.auth.clone().unwrap_or_else(|| self.auth.clone()),
            client: update.client.clone().or_else(|| self.client.clone()),
        }
    }
}

/// Partial change to a session's connection parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParamsUpdate {
    pub url: Option<String>,
    pub auth: Option<AuthDescriptor>,
    pub client: Option<String>,
}

impl ConnectionParamsUpdate {
    pub fn auth(auth: AuthDescriptor) -> Self {
        Self { auth: Some(auth), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.auth.is_none() && self.client.is_none()
    }
}
