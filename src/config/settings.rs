//! # Configuration Settings
//!
//! Defines the configuration structure for the ADT MCP gateway.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::connection::ProviderMode;
use crate::errors::{Error, Result};
use crate::mcp::tool_registry::ToolGroup;
use crate::mcp::transport::BindScope;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Transport selection and bind settings
    #[validate(nested)]
    pub transport: TransportConfig,

    /// Connection provisioning settings
    #[validate(nested)]
    pub auth: AuthConfig,

    /// Backend client settings
    #[validate(nested)]
    pub backend: BackendConfig,

    /// Exposed tool groups
    pub tools: ToolsConfig,

    /// Logging settings
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Checks the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        let transport = &self.transport;
        for (name, path) in [
            ("sse_path", &transport.sse_path),
            ("sse_message_path", &transport.sse_message_path),
            ("http_path", &transport.http_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::config(format!("{} must start with '/': {}", name, path)));
            }
        }

        if transport.kind != TransportKind::Stdio && transport.port == 0 {
            return Err(Error::config(format!(
                "Port must be between 1 and 65535 for the {} transport",
                transport.kind
            )));
        }

        if transport.sse_path == transport.sse_message_path {
            return Err(Error::config("SSE stream path and message path cannot be the same"));
        }

        if let Some(destination) = &self.auth.destination {
            if destination.trim().is_empty() {
                return Err(Error::config("Default destination cannot be blank"));
            }
        }

        Ok(())
    }

    /// Resolve the connection provider mode for the configured transport.
    ///
    /// `auto` follows the transport's bind scope. An explicit mode that disagrees
    /// with the bind scope is a [`Error::ConfigurationMismatch`].
    pub fn provider_mode(&self) -> Result<ProviderMode> {
        let scope = self.transport.bind_scope();
        let required = scope.required_provider_mode();
        match self.auth.mode {
            AuthMode::Auto => Ok(required),
            AuthMode::Local => crate::connection::validate_bind_scope(scope, ProviderMode::Local)
                .map(|_| ProviderMode::Local),
            AuthMode::Remote => {
                crate::connection::validate_bind_scope(scope, ProviderMode::Remote)
                    .map(|_| ProviderMode::Remote)
            }
        }
    }
}

/// Transport kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Line-delimited JSON-RPC on stdin/stdout
    #[default]
    Stdio,
    /// GET stream plus POST message endpoint
    Sse,
    /// Stateless POST request/response
    StreamableHttp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TransportConfig {
    /// Which transport to serve
    pub kind: TransportKind,

    /// Bind host for HTTP transports
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    /// Bind port for HTTP transports; ignored by stdio
    pub port: u16,

    /// SSE stream path
    #[validate(length(min = 1, message = "SSE path cannot be empty"))]
    pub sse_path: String,

    /// SSE message POST path
    #[validate(length(min = 1, message = "SSE message path cannot be empty"))]
    pub sse_message_path: String,

    /// Streamable HTTP POST path
    #[validate(length(min = 1, message = "HTTP path cannot be empty"))]
    pub http_path: String,

    /// SSE keep-alive interval in seconds
    #[validate(range(min = 1, max = 300, message = "Keep-alive must be between 1 and 300 seconds"))]
    pub keep_alive_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            host: "127.0.0.1".to_string(),
            port: 3000,
            sse_path: "/sse".to_string(),
            sse_message_path: "/messages".to_string(),
            http_path: "/mcp/stream/http".to_string(),
            keep_alive_seconds: 15,
        }
    }
}

impl TransportConfig {
    /// Get the bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Network exposure of the configured transport. Stdio never leaves the host.
    pub fn bind_scope(&self) -> BindScope {
        match self.kind {
            TransportKind::Stdio => BindScope::Loopback,
            TransportKind::Sse | TransportKind::StreamableHttp => BindScope::from_host(&self.host),
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }
}

/// Requested connection provider mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Derive from the transport bind scope
    #[default]
    Auto,
    /// Service keys and broker-managed tokens
    Local,
    /// Connection details supplied per request in headers
    Remote,
}

/// Connection provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,

    /// Default destination when a request names none
    pub destination: Option<String>,

    /// Directory holding `<destination>.json` service keys
    pub service_keys_dir: PathBuf,

    /// Directory holding persisted `<destination>.json` token sets
    pub sessions_dir: PathBuf,

    /// Refresh tokens this many seconds before they expire
    #[validate(range(max = 3600, message = "Refresh skew cannot exceed one hour"))]
    pub token_refresh_skew_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Auto,
            destination: None,
            service_keys_dir: PathBuf::from("./service-keys"),
            sessions_dir: PathBuf::from("./sessions"),
            token_refresh_skew_seconds: 60,
        }
    }
}

impl AuthConfig {
    pub fn refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_refresh_skew_seconds as i64)
    }
}

/// Backend client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackendConfig {
    /// Request timeout in seconds
    #[validate(range(min = 1, max = 600, message = "Timeout must be between 1 and 600 seconds"))]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { timeout_seconds: 60 }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Tool exposure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub groups: Vec<ToolGroup>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { groups: ToolGroup::all().to_vec() }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logs: false }
    }
}
