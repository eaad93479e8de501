//! Connection context passed explicitly with every dispatched call.

use crate::connection::ConnectionParams;
use crate::mcp::session::{AbapSession, Session, SessionId};

/// What the server needs to build a backend connection for one call
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub session_id: SessionId,
    pub destination: Option<String>,
    pub params: Option<ConnectionParams>,
    pub abap_session: Option<AbapSession>,
    /// Whether `session_id` names an entry in the session table
    pub tracked: bool,
}

impl ConnectionContext {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            destination: session.metadata.destination.clone(),
            params: session.connection_params.clone(),
            abap_session: session.abap_session.clone(),
            tracked: true,
        }
    }

    /// Context for a request that never enters the session table
    pub fn transient(
        session_id: SessionId,
        destination: Option<String>,
        params: Option<ConnectionParams>,
    ) -> Self {
        Self { session_id, destination, params, abap_session: None, tracked: false }
    }
}
