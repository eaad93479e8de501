//! Backend connections over the ADT REST interface.
//!
//! A connection applies the session's auth, client and backend cookies to
//! every request. Modifying requests carry a CSRF token, fetched on first use.
//! Cookies and the CSRF token the backend hands out are kept so they can be
//! recorded on the session after the call.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use reqwest::header::{COOKIE, SET_COOKIE};
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection::params::{AuthDescriptor, ConnectionParams};
use crate::mcp::session::{split_cookie, CSRF_TOKEN_NAME};

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FETCH_PATH: &str = "/sap/bc/adt/discovery";
const SAP_CLIENT_QUERY: &str = "sap-client";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend rejected the credentials (401)")]
    Unauthorized,

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid backend request: {0}")]
    InvalidRequest(String),

    #[error("Token refresh failed: {0}")]
    Refresh(String),
}

impl BackendError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Unauthorized)
    }
}

/// A request relative to the connection's base URL
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub content_type: Option<String>,
}

impl BackendRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            content_type: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body.into());
        self
    }

    fn is_modifying(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl BackendResponse {
    /// First header with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

/// Live connection to one backend system
#[async_trait]
pub trait BackendConnection: Send + Sync {
    async fn request(&self, request: BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Cookies and CSRF token collected so far, as `NAME=VALUE` strings.
    fn state_tokens(&self) -> Vec<String>;
}

/// Builds live connections from resolved parameters and backend session state
pub trait ConnectionFactory: Send + Sync {
    /// `state_tokens` seeds cookies and the CSRF token, in the format
    /// [`BackendConnection::state_tokens`] returns.
    fn create(
        &self,
        params: &ConnectionParams,
        state_tokens: &[String],
    ) -> Result<Arc<dyn BackendConnection>, BackendError>;
}

#[derive(Debug, Clone)]
pub struct HttpConnectionFactory {
    client: reqwest::Client,
}

impl HttpConnectionFactory {
    pub fn new(timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    fn create(
        &self,
        params: &ConnectionParams,
        state_tokens: &[String],
    ) -> Result<Arc<dyn BackendConnection>, BackendError> {
        url::Url::parse(&params.url)
            .map_err(|e| BackendError::InvalidRequest(format!("invalid base url: {}", e)))?;
        Ok(Arc::new(HttpBackendConnection::new(self.client.clone(), params.clone(), state_tokens)))
    }
}

#[derive(Debug, Default)]
struct BackendState {
    cookies: Vec<(String, String)>,
    csrf_token: Option<String>,
}

impl BackendState {
    fn store_cookie(&mut self, raw: &str) {
        if let Some((name, value)) = split_cookie(raw) {
            match self.cookies.iter_mut().find(|(n, _)| *n == name) {
                Some(existing) => existing.1 = value,
                None => self.cookies.push((name, value)),
            }
        }
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// reqwest-backed connection
pub struct HttpBackendConnection {
    client: reqwest::Client,
    params: ConnectionParams,
    state: RwLock<BackendState>,
}

impl HttpBackendConnection {
    pub fn new(
        client: reqwest::Client,
        params: ConnectionParams,
        state_tokens: &[String],
    ) -> Self {
        let mut state = BackendState::default();
        for raw in state_tokens {
            match split_cookie(raw) {
                Some((name, value)) if name.eq_ignore_ascii_case(CSRF_TOKEN_NAME) => {
                    state.csrf_token = Some(value).filter(|v| !v.is_empty());
                }
                Some(_) => state.store_cookie(raw),
                None => {}
            }
        }
        Self { client, params, state: RwLock::new(state) }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    fn csrf_token(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.csrf_token.clone())
    }

    fn set_csrf_token(&self, token: Option<String>) {
        if let Ok(mut state) = self.state.write() {
            state.csrf_token = token;
        }
    }

    fn build(&self, request: &BackendRequest, csrf: Option<&str>) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.params.url, request.path);
        let mut builder = self.client.request(request.method.clone(), url);

        if let Some(client) = &self.params.client {
            builder = builder.query(&[(SAP_CLIENT_QUERY, client.as_str())]);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &self.params.auth {
            AuthDescriptor::Jwt { token, .. } => builder.bearer_auth(token.expose_secret()),
            AuthDescriptor::Basic { username, password } => {
                builder.basic_auth(username, Some(password.expose_secret()))
            }
        };

        let cookies = self.state.read().ok().and_then(|s| s.cookie_header());
        if let Some(cookies) = cookies {
            builder = builder.header(COOKIE, cookies);
        }
        if let Some(token) = csrf {
            builder = builder.header(CSRF_HEADER, token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }

    /// Send and capture state; status handling is left to the caller.
    async fn send(
        &self,
        request: &BackendRequest,
        csrf: Option<&str>,
    ) -> Result<BackendResponse, BackendError> {
        let response = self.build(request, csrf).send().await?;
        let status = response.status().as_u16();

        let mut headers = Vec::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.push((name.as_str().to_string(), value.to_string()));
            }
        }

        if let Ok(mut state) = self.state.write() {
            for cookie in response.headers().get_all(SET_COOKIE) {
                if let Ok(raw) = cookie.to_str() {
                    state.store_cookie(raw);
                }
            }
        }

        let body = response.text().await?;
        debug!(method = %request.method, path = %request.path, status, "Backend request completed");
        Ok(BackendResponse { status, headers, body })
    }

    async fn fetch_csrf_token(&self) -> Result<String, BackendError> {
        let fetch = BackendRequest::get(CSRF_FETCH_PATH).with_header(CSRF_HEADER, "fetch");
        let response = self.send(&fetch, None).await?;
        if response.status == 401 {
            return Err(BackendError::Unauthorized);
        }

        let token = response
            .header(CSRF_HEADER)
            .filter(|t| !t.eq_ignore_ascii_case("required"))
            .map(str::to_string)
            .ok_or_else(|| BackendError::Status {
                status: response.status,
                body: "backend did not issue a CSRF token".to_string(),
            })?;

        self.set_csrf_token(Some(token.clone()));
        Ok(token)
    }

    fn csrf_rejected(response: &BackendResponse) -> bool {
        response.status == 403
            && response.header(CSRF_HEADER).is_some_and(|v| v.eq_ignore_ascii_case("required"))
    }
}

#[async_trait]
impl BackendConnection for HttpBackendConnection {
    async fn request(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        if !request.path.starts_with('/') {
            return Err(BackendError::InvalidRequest(format!(
                "path must start with '/': {}",
                request.path
            )));
        }

        let csrf = if request.is_modifying() {
            match self.csrf_token() {
                Some(token) => Some(token),
                None => Some(self.fetch_csrf_token().await?),
            }
        } else {
            None
        };

        let mut response = self.send(&request, csrf.as_deref()).await?;

        // A CSRF token expires with the backend session; fetch once more
        if request.is_modifying() && Self::csrf_rejected(&response) {
            warn!(path = %request.path, "CSRF token rejected, fetching a new one");
            self.set_csrf_token(None);
            let token = self.fetch_csrf_token().await?;
            response = self.send(&request, Some(&token)).await?;
        }

        match response.status {
            401 => Err(BackendError::Unauthorized),
            200..=299 => Ok(response),
            status => Err(BackendError::Status { status, body: response.body }),
        }
    }

    fn state_tokens(&self) -> Vec<String> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut tokens: Vec<String> =
            state.cookies.iter().map(|(n, v)| format!("{}={}", n, v)).collect();
        if let Some(token) = &state.csrf_token {
            tokens.push(format!("{}={}", CSRF_TOKEN_NAME, token));
        }
        tokens
    }
}
