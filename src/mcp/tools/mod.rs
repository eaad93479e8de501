//! MCP Tools Module
//!
//! Built-in ABAP ADT tools. Each submodule exposes `*_tool()` definitions and
//! `execute_*` handlers; [`builtin_registry`] wires them into a
//! [`ToolRegistry`] filtered to the configured groups.

pub mod locks;
pub mod search;
pub mod source;
pub mod structure;
pub mod system;

pub use locks::{execute_lock_object, execute_unlock_object, lock_object_tool, unlock_object_tool};
pub use search::{execute_search_object, search_object_tool};
pub use source::{execute_get_class, execute_get_program, get_class_tool, get_program_tool};
pub use structure::{execute_get_object_structure, get_object_structure_tool};
pub use system::{execute_get_adt_discovery, get_adt_discovery_tool};

use serde_json::Value;

use crate::connection::{BackendConnection, BackendError, BackendRequest};
use crate::mcp::error::McpError;
use crate::mcp::tool_registry::{ToolGroup, ToolOutput, ToolRegistry};

/// Header that keeps the backend work process bound across calls
pub const STATEFUL_SESSION_HEADER: &str = "X-sap-adt-sessiontype";

/// Register every built-in tool, then keep the requested groups.
pub fn builtin_registry(groups: &[ToolGroup]) -> Result<ToolRegistry, McpError> {
    let mut registry = ToolRegistry::new();

    registry.register_contextual(ToolGroup::ReadOnly, get_program_tool(), execute_get_program)?;
    registry.register_contextual(ToolGroup::ReadOnly, get_class_tool(), execute_get_class)?;
    registry.register_contextual(ToolGroup::Search, search_object_tool(), execute_search_object)?;
    registry.register_legacy(
        ToolGroup::System,
        get_adt_discovery_tool(),
        execute_get_adt_discovery,
    )?;
    registry.register_contextual(ToolGroup::LowLevel, lock_object_tool(), execute_lock_object)?;
    registry.register_contextual(ToolGroup::LowLevel, unlock_object_tool(), execute_unlock_object)?;
    registry.register_contextual(
        ToolGroup::HighLevel,
        get_object_structure_tool(),
        execute_get_object_structure,
    )?;

    Ok(registry.with_groups(groups))
}

/// Required, non-blank string argument
pub(crate) fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, McpError> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| McpError::InvalidParams(format!("Missing required parameter: {}", name)))
}

/// Object name as it appears in ADT URIs
pub(crate) fn object_segment(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.to_ascii_lowercase().as_bytes()).collect()
}

/// Run a request whose body is the tool's text output.
///
/// Non-success statuses become an error-flagged output; 401 and transport
/// failures propagate.
pub(crate) async fn fetch_text(
    connection: &dyn BackendConnection,
    request: BackendRequest,
) -> Result<ToolOutput, McpError> {
    match connection.request(request).await {
        Ok(response) => Ok(ToolOutput::text(response.body)),
        Err(BackendError::Status { status, body }) => {
            Ok(ToolOutput::error(format!("Backend returned {}: {}", status, body)))
        }
        Err(e) => Err(e.into()),
    }
}
