//! MCP Tool for ADT service discovery
//!
//! Registered as a legacy single-argument handler.

use serde_json::json;
use tracing::instrument;

use crate::connection::{BackendRequest, CSRF_FETCH_PATH};
use crate::mcp::error::McpError;
use crate::mcp::protocol::Tool;
use crate::mcp::tool_registry::{LegacyCall, ToolOutput};
use crate::mcp::tools::fetch_text;

/// Returns the MCP tool definition for the ADT discovery document.
pub fn get_adt_discovery_tool() -> Tool {
    Tool::new(
        "GetAdtDiscovery",
        "Fetch the ADT discovery document listing the services the system offers.",
        json!({ "type": "object", "properties": {} }),
    )
}

#[instrument(skip_all, name = "mcp_execute_get_adt_discovery")]
pub async fn execute_get_adt_discovery(call: LegacyCall) -> Result<ToolOutput, McpError> {
    let request =
        BackendRequest::get(CSRF_FETCH_PATH).with_header("accept", "application/atomsvc+xml");
    fetch_text(call.connection.as_ref(), request).await
}
