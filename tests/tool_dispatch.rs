//! Tool dispatch tests: connection injection, handler kinds, output
//! normalization and token refresh on an expired backend token.

mod common;

use std::sync::Arc;

use adt_mcp_gateway::auth::TokenProvider;
use adt_mcp_gateway::config::TransportKind;
use adt_mcp_gateway::connection::{
    AuthDescriptor, BackendConnection, BackendRequest, ConnectionRequest,
};
use adt_mcp_gateway::mcp::protocol::{error_codes, JsonRpcResponse, Tool};
use adt_mcp_gateway::mcp::tools::builtin_registry;
use adt_mcp_gateway::mcp::{
    McpError, SessionOrigin, ToolContext, ToolGroup, ToolOutput, ToolRegistry, TransportServices,
};
use common::{broker_deps, echo_registry, local_services, tools_call, CountingTokenProvider, ECHO_PATH};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn result_text(response: &JsonRpcResponse) -> String {
    let result = response.result.as_ref().expect("tool call succeeded");
    result["content"][0]["text"].as_str().unwrap().to_string()
}

async fn provisioned_session(
    services: &TransportServices,
    destination: &str,
) -> adt_mcp_gateway::mcp::SessionId {
    let session = services.sessions.create_session(
        SessionOrigin::new(TransportKind::Sse).with_destination(Some(destination.to_string())),
    );
    services
        .provision_session(&ConnectionRequest::for_destination(session.id.clone(), destination))
        .await
        .unwrap();
    session.id
}

// -----------------------------------------------------------------------------
// Token refresh
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_expired_token_is_refreshed_and_retried_once() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ECHO_PATH))
        .and(header("authorization", "Bearer token-0"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path(ECHO_PATH))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "SAP_SESSIONID_DEV_100=abc123; path=/")
                .set_body_string("fresh"),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let provider = Arc::new(CountingTokenProvider::default());
    let deps = broker_deps(&[("DEV", &backend.uri())], provider.clone() as Arc<dyn TokenProvider>);
    let services = local_services(echo_registry(), deps, None);
    let session_id = provisioned_session(&services, "DEV").await;

    let response = services.handler.handle_message(&session_id, &tools_call(1, "Echo")).await.unwrap();
    assert_eq!(result_text(&response), "fresh");
    assert_eq!(provider.calls(), 2);

    let session = services.sessions.get_session(&session_id).unwrap();
    match session.connection_params.unwrap().auth {
        AuthDescriptor::Jwt { token, .. } => assert_eq!(token.expose_secret(), "token-1"),
        other => panic!("unexpected auth {:?}", other.kind()),
    }
    assert_eq!(session.abap_session.unwrap().session_id, "abc123");
}

#[tokio::test]
async fn test_second_unauthorized_is_reported() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ECHO_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&backend)
        .await;

    let provider = Arc::new(CountingTokenProvider::default());
    let deps = broker_deps(&[("DEV", &backend.uri())], provider.clone() as Arc<dyn TokenProvider>);
    let services = local_services(echo_registry(), deps, None);
    let session_id = provisioned_session(&services, "DEV").await;

    let response = services.handler.handle_message(&session_id, &tools_call(1, "Echo")).await.unwrap();
    assert_eq!(response.error.unwrap().code, error_codes::BACKEND_ERROR);
}

#[tokio::test]
async fn test_refresh_keeps_cookies_without_session_cookie() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sap/bc/adt/first"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "sap-usercontext=sap-client=100; path=/"),
        )
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/sap/bc/adt/second"))
        .and(header("authorization", "Bearer token-0"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/sap/bc/adt/second"))
        .and(header("authorization", "Bearer token-1"))
        .and(header("cookie", "sap-usercontext=sap-client=100"))
        .respond_with(ResponseTemplate::new(200).set_body_string("kept"))
        .expect(1)
        .mount(&backend)
        .await;

    let mut registry = ToolRegistry::new();
    registry
        .register_contextual(
            ToolGroup::ReadOnly,
            Tool::new("TwoStep", "Two backend reads", json!({"type": "object"})),
            |ctx: ToolContext, _args: Value| async move {
                ctx.connection.request(BackendRequest::get("/sap/bc/adt/first")).await?;
                let second = ctx.connection.request(BackendRequest::get("/sap/bc/adt/second")).await?;
                Ok::<_, McpError>(ToolOutput::text(second.body))
            },
        )
        .unwrap();

    let provider = Arc::new(CountingTokenProvider::default()) as Arc<dyn TokenProvider>;
    let services = local_services(registry, broker_deps(&[("DEV", &backend.uri())], provider), None);
    let session_id = provisioned_session(&services, "DEV").await;

    let response = services.handler.handle_message(&session_id, &tools_call(1, "TwoStep")).await.unwrap();
    assert_eq!(result_text(&response), "kept");
}

// -----------------------------------------------------------------------------
// Built-in tools
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_legacy_handler_receives_connection() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sap/bc/adt/discovery"))
        .and(query_param("sap-client", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<app:service/>"))
        .mount(&backend)
        .await;

    let provider = Arc::new(CountingTokenProvider::default()) as Arc<dyn TokenProvider>;
    let registry = builtin_registry(&[ToolGroup::System]).unwrap();
    let services = local_services(registry, broker_deps(&[("DEV", &backend.uri())], provider), None);
    let session_id = provisioned_session(&services, "DEV").await;

    let response =
        services.handler.handle_message(&session_id, &tools_call(1, "GetAdtDiscovery")).await.unwrap();
    assert_eq!(result_text(&response), "<app:service/>");
}

#[tokio::test]
async fn test_json_output_is_normalized_to_text() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sap/bc/adt/repository/informationsystem/search"))
        .and(query_param("operation", "quickSearch"))
        .and(query_param("query", "ZCL*"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<refs/>"))
        .mount(&backend)
        .await;

    let provider = Arc::new(CountingTokenProvider::default()) as Arc<dyn TokenProvider>;
    let registry = builtin_registry(&[ToolGroup::Search]).unwrap();
    let services = local_services(registry, broker_deps(&[("DEV", &backend.uri())], provider), None);
    let session_id = provisioned_session(&services, "DEV").await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": {"name": "SearchObject", "arguments": {"query": "ZCL"}}
    });
    let response =
        services.handler.handle_message(&session_id, &request.to_string()).await.unwrap();

    let text = result_text(&response);
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["query"], "ZCL*");
    assert_eq!(parsed["references"], "<refs/>");
}

#[tokio::test]
async fn test_backend_failure_status_becomes_tool_error() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sap/bc/adt/programs/programs/zmissing/source/main"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&backend)
        .await;

    let provider = Arc::new(CountingTokenProvider::default()) as Arc<dyn TokenProvider>;
    let registry = builtin_registry(&[ToolGroup::ReadOnly]).unwrap();
    let services = local_services(registry, broker_deps(&[("DEV", &backend.uri())], provider), None);
    let session_id = provisioned_session(&services, "DEV").await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "tools/call",
        "params": {"name": "GetProgram", "arguments": {"program_name": "ZMISSING"}}
    });
    let response =
        services.handler.handle_message(&session_id, &request.to_string()).await.unwrap();

    let error = response.error.unwrap();
    assert_eq!(error.code, error_codes::TOOL_EXECUTION_ERROR);
    assert!(error.message.contains("404"));
}

#[tokio::test]
async fn test_lock_uses_backend_session_and_csrf() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sap/bc/adt/discovery"))
        .and(header("x-csrf-token", "fetch"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-csrf-token", "csrf-1")
                .insert_header("set-cookie", "SAP_SESSIONID_DEV_100=s1; path=/"),
        )
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/sap/bc/adt/programs/programs/zlocked"))
        .and(query_param("_action", "LOCK"))
        .and(header("x-csrf-token", "csrf-1"))
        .and(header("x-sap-adt-sessiontype", "stateful"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<DATA><LOCK_HANDLE>H1</LOCK_HANDLE></DATA>"),
        )
        .mount(&backend)
        .await;

    let provider = Arc::new(CountingTokenProvider::default()) as Arc<dyn TokenProvider>;
    let registry = builtin_registry(&[ToolGroup::LowLevel]).unwrap();
    let services = local_services(registry, broker_deps(&[("DEV", &backend.uri())], provider), None);
    let session_id = provisioned_session(&services, "DEV").await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 5,
        "method": "tools/call",
        "params": {
            "name": "LockObject",
            "arguments": {"object_uri": "/sap/bc/adt/programs/programs/zlocked"}
        }
    });
    let response =
        services.handler.handle_message(&session_id, &request.to_string()).await.unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&result_text(&response)).unwrap();
    assert_eq!(parsed["lock_handle"], "H1");

    let abap = services.sessions.get_session(&session_id).unwrap().abap_session.unwrap();
    assert_eq!(abap.session_id, "s1");
    assert_eq!(abap.security_token.as_deref(), Some("csrf-1"));
}

#[tokio::test]
async fn test_tool_call_without_destination() {
    let provider = Arc::new(CountingTokenProvider::default()) as Arc<dyn TokenProvider>;
    let services = local_services(echo_registry(), broker_deps(&[], provider), None);
    let session = services.sessions.create_session(SessionOrigin::new(TransportKind::Sse));

    let list = services
        .handler
        .handle_message(&session.id, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
        .await
        .unwrap();
    assert!(list.error.is_none());

    let response = services.handler.handle_message(&session.id, &tools_call(2, "Echo")).await.unwrap();
    assert_eq!(response.error.unwrap().code, error_codes::CONNECTION_REQUIRED);
}
