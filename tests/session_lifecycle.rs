//! Session store behavior across threads and over arbitrary cookie values.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use adt_mcp_gateway::config::TransportKind;
use adt_mcp_gateway::connection::{AuthDescriptor, ConnectionParams};
use adt_mcp_gateway::mcp::{McpError, SessionManager, SessionOrigin};
use proptest::prelude::*;

fn origin() -> SessionOrigin {
    SessionOrigin::new(TransportKind::Sse)
}

#[test]
fn test_concurrent_creation_yields_distinct_ids() {
    let manager = Arc::new(SessionManager::new());
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    manager.on_created(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            std::thread::spawn(move || {
                (0..25).map(|_| manager.create_session(origin()).id).collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 200);
    assert_eq!(manager.session_count(), 200);
    assert_eq!(created.load(Ordering::SeqCst), 200);
}

#[test]
fn test_full_lifecycle() {
    let manager = SessionManager::new();
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    manager.on_closed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let session = manager.create_session(origin().with_destination(Some("DEV".to_string())));
    assert_eq!(session.destination(), Some("DEV"));
    assert!(session.connection_params.is_none());

    let params = ConnectionParams::new(
        "https://dev.example.com/",
        AuthDescriptor::jwt("token", None).unwrap(),
    )
    .with_client(Some("100".to_string()));
    manager.update_connection_params(&session.id, params.clone()).unwrap();
    assert_eq!(manager.connection_params(&session.id), Some(params));

    let abap = manager
        .set_abap_session(&session.id, &["SAP_SESSIONID=ABC123; path=/".to_string()])
        .unwrap();
    assert_eq!(abap.session_id, "ABC123");
    assert_eq!(
        manager.get_session(&session.id).unwrap().abap_session.unwrap().cookie_header(),
        "SAP_SESSIONID=ABC123"
    );

    assert!(manager.delete_session(&session.id));
    assert!(manager.get_session(&session.id).is_none());
    assert!(!manager.delete_session(&session.id));
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let err = manager
        .update_connection_params(
            &session.id,
            ConnectionParams::new("https://x", AuthDescriptor::jwt("t", None).unwrap()),
        )
        .unwrap_err();
    assert!(matches!(err, McpError::SessionNotFound(_)));
}

#[test]
fn test_state_without_session_cookie_is_rejected() {
    let manager = SessionManager::new();
    let session = manager.create_session(origin());

    let err = manager
        .set_abap_session(&session.id, &["sap-usercontext=sap-client=100".to_string()])
        .unwrap_err();
    assert!(matches!(err, McpError::MalformedBackendState(_)));
    assert!(manager.get_session(&session.id).unwrap().abap_session.is_none());
}

proptest! {
    #[test]
    fn prop_session_cookie_value_is_extracted(
        suffix in "[A-Z0-9_]{0,12}",
        value in "[A-Za-z0-9%]{1,40}",
    ) {
        let manager = SessionManager::new();
        let session = manager.create_session(origin());
        let tokens = vec![
            "sap-usercontext=sap-client=100; path=/".to_string(),
            format!("SAP_SESSIONID{}={}; path=/; secure", suffix, value),
        ];

        let abap = manager.set_abap_session(&session.id, &tokens).unwrap();
        prop_assert_eq!(abap.session_id, value);
        prop_assert_eq!(abap.cookies.len(), 2);
        prop_assert!(abap.security_token.is_none());
    }
}
