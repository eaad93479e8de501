//! Client Session Management
//!
//! Owns the table of live client sessions. Each session carries the resolved
//! backend connection parameters and, once the backend has handed out state
//! tokens, the backend session (cookies and CSRF token) used by stateful tool
//! sequences. Only this manager mutates the table.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::TransportKind;
use crate::connection::ConnectionParams;
use crate::mcp::error::McpError;
use crate::mcp::events::Listeners;

/// Well-known id of the single stdio session
pub const STDIO_SESSION_ID: &str = "stdio";

/// Cookie name prefix identifying the backend session
pub const SESSION_COOKIE_PREFIX: &str = "SAP_SESSIONID";

/// State token name carrying the CSRF token
pub const CSRF_TOKEN_NAME: &str = "x-csrf-token";

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn stdio() -> Self {
        Self(STDIO_SESSION_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Split the `NAME=VALUE` head of a `Set-Cookie` style string.
pub fn split_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Backend-side stateful handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbapSession {
    pub session_id: String,
    /// `NAME=VALUE` pairs, the session cookie included
    pub cookies: Vec<String>,
    pub security_token: Option<String>,
}

impl AbapSession {
    /// Parse raw state tokens as returned by the backend.
    ///
    /// The session id is the value of the first non-empty cookie whose name
    /// starts with `SAP_SESSIONID`; an `x-csrf-token` entry supplies the
    /// security token.
    pub fn parse(tokens: &[String]) -> Result<Self, McpError> {
        let mut session_id = None;
        let mut cookies = Vec::new();
        let mut security_token = None;

        for raw in tokens {
            let Some((name, value)) = split_cookie(raw) else {
                continue;
            };
            if name.eq_ignore_ascii_case(CSRF_TOKEN_NAME) {
                security_token = Some(value).filter(|v| !v.is_empty());
                continue;
            }
            if session_id.is_none() && name.starts_with(SESSION_COOKIE_PREFIX) && !value.is_empty()
            {
                session_id = Some(value.clone());
            }
            cookies.push(format!("{}={}", name, value));
        }

        let session_id = session_id.ok_or_else(|| {
            McpError::MalformedBackendState(format!(
                "no {} cookie in {} state token(s)",
                SESSION_COOKIE_PREFIX,
                tokens.len()
            ))
        })?;

        Ok(Self { session_id, cookies, security_token })
    }

    /// Value for a `Cookie` request header
    pub fn cookie_header(&self) -> String {
        self.cookies.join("; ")
    }

    /// Back to raw state tokens, the security token included
    pub fn state_tokens(&self) -> Vec<String> {
        let mut tokens = self.cookies.clone();
        if let Some(token) = &self.security_token {
            tokens.push(format!("{}={}", CSRF_TOKEN_NAME, token));
        }
        tokens
    }
}

/// Where a session came from
#[derive(Debug, Clone, Default)]
pub struct SessionOrigin {
    pub transport: TransportKind,
    pub client_address: Option<String>,
    pub destination: Option<String>,
}

impl SessionOrigin {
    pub fn new(transport: TransportKind) -> Self {
        Self { transport, ..Default::default() }
    }

    pub fn with_client_address(mut self, address: Option<String>) -> Self {
        self.client_address = address;
        self
    }

    pub fn with_destination(mut self, destination: Option<String>) -> Self {
        self.destination = destination;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub transport: TransportKind,
    pub client_address: Option<String>,
    pub destination: Option<String>,
    pub request_count: u64,
    pub error_count: u64,
}

/// One client's conversation with the gateway
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: Instant,
    pub last_activity: Instant,
    /// Absent until the session has been provisioned
    pub connection_params: Option<ConnectionParams>,
    pub abap_session: Option<AbapSession>,
    pub metadata: SessionMetadata,
}

impl Session {
    fn new(id: SessionId, origin: SessionOrigin) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_activity: now,
            connection_params: None,
            abap_session: None,
            metadata: SessionMetadata {
                transport: origin.transport,
                client_address: origin.client_address,
                destination: origin.destination,
                request_count: 0,
                error_count: 0,
            },
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn destination(&self) -> Option<&str> {
        self.metadata.destination.as_deref()
    }
}

/// Session table with lifecycle events
pub struct SessionManager {
    sessions: DashMap<SessionId, Session>,
    created: Listeners<Session>,
    closed: Listeners<Session>,
    abap_session_set: Listeners<Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            created: Listeners::new("session_created"),
            closed: Listeners::new("session_closed"),
            abap_session_set: Listeners::new("abap_session_set"),
        }
    }

    pub fn on_created<F>(&self, listener: F)
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.created.subscribe(listener);
    }

    pub fn on_closed<F>(&self, listener: F)
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.closed.subscribe(listener);
    }

    pub fn on_abap_session_set<F>(&self, listener: F)
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.abap_session_set.subscribe(listener);
    }

    /// Create a session with a fresh id
    pub fn create_session(&self, origin: SessionOrigin) -> Session {
        let session = loop {
            let id = SessionId::generate();
            if let Entry::Vacant(entry) = self.sessions.entry(id.clone()) {
                let session = Session::new(id, origin);
                entry.insert(session.clone());
                break session;
            }
        };

        debug!(session_id = %session.id, transport = %session.metadata.transport, "Created session");
        self.created.emit(&session);
        session
    }

    /// Create a session under a well-known id; fails while that id is live.
    pub fn create_session_with_id(
        &self,
        id: SessionId,
        origin: SessionOrigin,
    ) -> Result<Session, McpError> {
        let session = match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(McpError::InvalidRequest(format!("session '{}' already exists", id)))
            }
            Entry::Vacant(entry) => {
                let session = Session::new(id, origin);
                entry.insert(session.clone());
                session
            }
        };

        debug!(session_id = %session.id, transport = %session.metadata.transport, "Created session");
        self.created.emit(&session);
        Ok(session)
    }

    /// Look up a session, updating its last activity.
    pub fn get_session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get_mut(id).map(|mut entry| {
            entry.touch();
            entry.clone()
        })
    }

    /// Current connection params without touching the session
    pub fn connection_params(&self, id: &SessionId) -> Option<ConnectionParams> {
        self.sessions.get(id).and_then(|s| s.connection_params.clone())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Remove a session. Unknown ids are ignored.
    ///
    /// Returns true if the session was removed.
    pub fn delete_session(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                debug!(session_id = %id, "Removed session");
                self.closed.emit(&session);
                true
            }
            None => false,
        }
    }

    /// Replace the session's connection params wholesale
    pub fn update_connection_params(
        &self,
        id: &SessionId,
        params: ConnectionParams,
    ) -> Result<(), McpError> {
        let mut entry =
            self.sessions.get_mut(id).ok_or_else(|| McpError::SessionNotFound(id.to_string()))?;
        entry.connection_params = Some(params);
        entry.touch();
        debug!(session_id = %id, "Updated connection params");
        Ok(())
    }

    /// Record backend state tokens on the session
    pub fn set_abap_session(
        &self,
        id: &SessionId,
        tokens: &[String],
    ) -> Result<AbapSession, McpError> {
        let abap_session = AbapSession::parse(tokens)?;

        let snapshot = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| McpError::SessionNotFound(id.to_string()))?;
            entry.abap_session = Some(abap_session.clone());
            entry.clone()
        };

        debug!(
            session_id = %id,
            abap_session_id = %abap_session.session_id,
            has_security_token = abap_session.security_token.is_some(),
            "Stored backend session"
        );
        self.abap_session_set.emit(&snapshot);
        Ok(abap_session)
    }

    pub fn clear_abap_session(&self, id: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            if entry.abap_session.take().is_some() {
                debug!(session_id = %id, "Cleared backend session");
            }
        }
    }

    /// Bump request counters; returns false for unknown ids.
    pub fn record_request(&self, id: &SessionId, is_error: bool) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                entry.metadata.request_count += 1;
                if is_error {
                    entry.metadata.error_count += 1;
                }
                entry.touch();
                true
            }
            None => false,
        }
    }

    /// Close and remove every session
    ///
    /// Returns the number of sessions removed.
    pub fn clear_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let removed = ids.iter().filter(|id| self.delete_session(id)).count();
        if removed > 0 {
            info!(removed, "Cleared all sessions");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Arc wrapper for shared session manager
pub type SharedSessionManager = Arc<SessionManager>;

pub fn create_session_manager() -> SharedSessionManager {
    Arc::new(SessionManager::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::AuthDescriptor;
    use std::sync::Mutex;

    fn params(token: &str) -> ConnectionParams {
        ConnectionParams::new("https://dev.example.com", AuthDescriptor::jwt(token, None).unwrap())
    }

    #[test]
    fn test_session_id() {
        let id = SessionId::new("abc123");
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(format!("{}", id), "abc123");
        assert_eq!(SessionId::stdio().as_str(), STDIO_SESSION_ID);
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_create_session_starts_empty() {
        let manager = SessionManager::new();
        let session = manager.create_session(SessionOrigin::new(TransportKind::Sse));

        assert!(session.connection_params.is_none());
        assert!(session.abap_session.is_none());
        assert_eq!(session.metadata.request_count, 0);
        assert_eq!(session.metadata.transport, TransportKind::Sse);
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn test_create_with_id_rejects_live_id() {
        let manager = SessionManager::new();
        manager.create_session_with_id(SessionId::stdio(), SessionOrigin::default()).unwrap();
        assert!(manager
            .create_session_with_id(SessionId::stdio(), SessionOrigin::default())
            .is_err());

        manager.delete_session(&SessionId::stdio());
        assert!(manager
            .create_session_with_id(SessionId::stdio(), SessionOrigin::default())
            .is_ok());
    }

    #[test]
    fn test_get_session_touches() {
        let manager = SessionManager::new();
        let created = manager.create_session(SessionOrigin::default());

        std::thread::sleep(std::time::Duration::from_millis(10));
        let fetched = manager.get_session(&created.id).unwrap();
        assert!(fetched.last_activity > created.last_activity);
    }

    #[test]
    fn test_delete_session() {
        let manager = SessionManager::new();
        let session = manager.create_session(SessionOrigin::default());

        assert!(manager.delete_session(&session.id));
        assert!(manager.get_session(&session.id).is_none());
        // Unknown id is a no-op
        assert!(!manager.delete_session(&session.id));
    }

    #[test]
    fn test_update_connection_params() {
        let manager = SessionManager::new();
        let session = manager.create_session(SessionOrigin::default());

        manager.update_connection_params(&session.id, params("t1")).unwrap();
        assert_eq!(manager.get_session(&session.id).unwrap().connection_params, Some(params("t1")));

        let missing = manager.update_connection_params(&SessionId::new("nope"), params("t1"));
        assert!(matches!(missing, Err(McpError::SessionNotFound(_))));
    }

    #[test]
    fn test_parse_abap_session() {
        let abap = AbapSession::parse(&[
            "sap-usercontext=sap-client=100; path=/".to_string(),
            "SAP_SESSIONID_DEV_100=ABC123; path=/; HttpOnly".to_string(),
            "X-CSRF-Token=tok".to_string(),
        ])
        .unwrap();

        assert_eq!(abap.session_id, "ABC123");
        assert_eq!(abap.security_token.as_deref(), Some("tok"));
        assert_eq!(
            abap.cookie_header(),
            "sap-usercontext=sap-client=100; SAP_SESSIONID_DEV_100=ABC123"
        );
    }

    #[test]
    fn test_parse_abap_session_without_session_cookie() {
        let error = AbapSession::parse(&["MYSAPSSO2=xyz; path=/".to_string()]).unwrap_err();
        assert!(matches!(error, McpError::MalformedBackendState(_)));

        // An emptied session cookie does not count
        assert!(AbapSession::parse(&["SAP_SESSIONID_DEV=; path=/".to_string()]).is_err());
    }

    #[test]
    fn test_set_and_clear_abap_session() {
        let manager = SessionManager::new();
        let session = manager.create_session(SessionOrigin::default());

        let abap = manager
            .set_abap_session(&session.id, &["SAP_SESSIONID=ABC123; path=/".to_string()])
            .unwrap();
        assert_eq!(abap.session_id, "ABC123");
        assert!(manager.get_session(&session.id).unwrap().abap_session.is_some());

        manager.clear_abap_session(&session.id);
        manager.clear_abap_session(&session.id);
        assert!(manager.get_session(&session.id).unwrap().abap_session.is_none());
    }

    #[test]
    fn test_events_fire() {
        let manager = SessionManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        manager.on_created(move |s| l.lock().unwrap().push(format!("created:{}", s.id)));
        let l = log.clone();
        manager.on_abap_session_set(move |s| l.lock().unwrap().push(format!("abap:{}", s.id)));
        let l = log.clone();
        manager.on_closed(move |s| l.lock().unwrap().push(format!("closed:{}", s.id)));

        let id = SessionId::new("fixed");
        manager.create_session_with_id(id.clone(), SessionOrigin::default()).unwrap();
        manager.set_abap_session(&id, &["SAP_SESSIONID=X".to_string()]).unwrap();
        manager.delete_session(&id);

        assert_eq!(*log.lock().unwrap(), vec!["created:fixed", "abap:fixed", "closed:fixed"]);
    }

    #[test]
    fn test_listener_may_call_back_into_manager() {
        let manager = Arc::new(SessionManager::new());
        let weak = Arc::downgrade(&manager);
        let seen = Arc::new(Mutex::new(None));

        let s = seen.clone();
        manager.on_created(move |session| {
            if let Some(manager) = weak.upgrade() {
                *s.lock().unwrap() = Some(manager.contains(&session.id));
            }
        });

        manager.create_session(SessionOrigin::default());
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_record_request_and_clear_all() {
        let manager = SessionManager::new();
        let a = manager.create_session(SessionOrigin::default());
        manager.create_session(SessionOrigin::default());

        assert!(manager.record_request(&a.id, false));
        assert!(manager.record_request(&a.id, true));
        let meta = manager.get_session(&a.id).unwrap().metadata;
        assert_eq!((meta.request_count, meta.error_count), (2, 1));

        assert_eq!(manager.clear_all(), 2);
        assert_eq!(manager.session_count(), 0);
        assert!(!manager.record_request(&a.id, false));
    }
}
