//! Connection headers sent by clients.
//!
//! `x-mcp-destination` picks a destination in local mode. The `x-sap-*` family
//! carries a complete connection in remote mode: a URL plus either a JWT or a
//! login/password pair.

use http::HeaderMap;
use tracing::debug;

use crate::connection::params::{AuthDescriptor, ConnectionParams};
use crate::mcp::error::McpError;

pub const DESTINATION_HEADER: &str = "x-mcp-destination";
pub const SAP_URL_HEADER: &str = "x-sap-url";
pub const SAP_AUTH_TYPE_HEADER: &str = "x-sap-auth-type";
pub const SAP_JWT_TOKEN_HEADER: &str = "x-sap-jwt-token";
pub const SAP_REFRESH_TOKEN_HEADER: &str = "x-sap-refresh-token";
pub const SAP_LOGIN_HEADER: &str = "x-sap-login";
pub const SAP_PASSWORD_HEADER: &str = "x-sap-password";
pub const SAP_CLIENT_HEADER: &str = "x-sap-client";

/// Trimmed, non-empty header value
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

pub fn destination_from_headers(headers: &HeaderMap) -> Option<String> {
    header_value(headers, DESTINATION_HEADER).map(str::to_string)
}

/// A URL plus one complete credential pair
pub fn has_connection_headers(headers: &HeaderMap) -> bool {
    let has_url = header_value(headers, SAP_URL_HEADER).is_some();
    let has_jwt = header_value(headers, SAP_JWT_TOKEN_HEADER).is_some();
    let has_basic = header_value(headers, SAP_LOGIN_HEADER).is_some()
        && header_value(headers, SAP_PASSWORD_HEADER).is_some();
    has_url && (has_jwt || has_basic)
}

/// Turns request headers into connection parameters
pub trait HeaderValidator: Send + Sync {
    fn validate(&self, headers: &HeaderMap) -> Result<ConnectionParams, McpError>;
}

/// Validates the `x-sap-*` header family
#[derive(Debug, Clone, Copy, Default)]
pub struct SapHeaderValidator;

impl SapHeaderValidator {
    fn auth_from_headers(&self, headers: &HeaderMap) -> Result<AuthDescriptor, McpError> {
        let jwt = header_value(headers, SAP_JWT_TOKEN_HEADER);
        let login = header_value(headers, SAP_LOGIN_HEADER);
        let password = header_value(headers, SAP_PASSWORD_HEADER);

        let auth_type = match header_value(headers, SAP_AUTH_TYPE_HEADER) {
            Some(explicit) => explicit.to_ascii_lowercase(),
            None if jwt.is_some() => "jwt".to_string(),
            None if login.is_some() || password.is_some() => "basic".to_string(),
            None => {
                return Err(McpError::InvalidHeaders(format!(
                    "missing credentials; send {} or {} and {}",
                    SAP_JWT_TOKEN_HEADER, SAP_LOGIN_HEADER, SAP_PASSWORD_HEADER
                )))
            }
        };

        match auth_type.as_str() {
            "jwt" => {
                let token = jwt.ok_or_else(|| {
                    McpError::InvalidHeaders(format!("{} is required for jwt", SAP_JWT_TOKEN_HEADER))
                })?;
                let refresh = header_value(headers, SAP_REFRESH_TOKEN_HEADER).map(Into::into);
                AuthDescriptor::jwt(token, refresh)
                    .map_err(|e| McpError::InvalidHeaders(e.to_string()))
            }
            "basic" => match (login, password) {
                (Some(login), Some(password)) => AuthDescriptor::basic(login, password)
                    .map_err(|e| McpError::InvalidHeaders(e.to_string())),
                _ => Err(McpError::InvalidHeaders(format!(
                    "{} and {} are required for basic",
                    SAP_LOGIN_HEADER, SAP_PASSWORD_HEADER
                ))),
            },
            other => Err(McpError::InvalidHeaders(format!(
                "unsupported {} '{}'; expected jwt or basic",
                SAP_AUTH_TYPE_HEADER, other
            ))),
        }
    }
}

impl HeaderValidator for SapHeaderValidator {
    fn validate(&self, headers: &HeaderMap) -> Result<ConnectionParams, McpError> {
        let url = header_value(headers, SAP_URL_HEADER)
            .ok_or_else(|| McpError::InvalidHeaders(format!("{} is required", SAP_URL_HEADER)))?;

        let parsed = url::Url::parse(url)
            .map_err(|e| McpError::InvalidHeaders(format!("invalid {}: {}", SAP_URL_HEADER, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(McpError::InvalidHeaders(format!(
                "{} must use http or https",
                SAP_URL_HEADER
            )));
        }

        let auth = self.auth_from_headers(headers)?;
        let client = header_value(headers, SAP_CLIENT_HEADER).map(str::to_string);

        debug!(url = %url, auth_type = auth.kind(), "Validated connection headers");
        Ok(ConnectionParams::new(url, auth).with_client(client))
    }
}
