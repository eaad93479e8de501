//! # Structured Logging
//!
//! Span macros and start-up logging helpers built on the tracing ecosystem.

/// Create a tracing span for one inbound MCP message on a session.
///
/// ```rust,ignore
/// let span = session_span!("sse", session_id);
/// ```
#[macro_export]
macro_rules! session_span {
    ($transport:expr, $session_id:expr) => {
        tracing::info_span!(
            "mcp_message",
            transport = %$transport,
            session_id = %$session_id,
            message_id = %uuid::Uuid::new_v4(),
            method = tracing::field::Empty
        )
    };
    ($transport:expr, $session_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "mcp_message",
            transport = %$transport,
            session_id = %$session_id,
            message_id = %uuid::Uuid::new_v4(),
            method = tracing::field::Empty,
            $($field)*
        )
    };
}

/// Create a tracing span for a tool invocation.
#[macro_export]
macro_rules! tool_span {
    ($tool:expr, $session_id:expr) => {
        tracing::info_span!(
            "tool_call",
            tool = %$tool,
            session_id = %$session_id,
            call_id = %uuid::Uuid::new_v4(),
            destination = tracing::field::Empty
        )
    };
    ($tool:expr, $session_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "tool_call",
            tool = %$tool,
            session_id = %$session_id,
            call_id = %uuid::Uuid::new_v4(),
            destination = tracing::field::Empty,
            $($field)*
        )
    };
}

/// Log the resolved configuration at start-up
pub fn log_config_info(config: &crate::config::GatewayConfig) {
    tracing::info!(
        transport = %config.transport.kind,
        bind_address = %config.transport.bind_address(),
        bind_scope = ?config.transport.bind_scope(),
        auth_mode = ?config.auth.mode,
        destination = ?config.auth.destination,
        service_keys_dir = %config.auth.service_keys_dir.display(),
        backend_timeout_seconds = config.backend.timeout_seconds,
        tool_groups = ?config.tools.groups,
        "Gateway configuration loaded"
    );
}
