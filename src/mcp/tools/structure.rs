//! MCP Tool for object structure
//!
//! Wraps the repository node structure service, which lists the includes,
//! methods and other components an object is made of.

use serde_json::{json, Value};
use tracing::instrument;

use crate::connection::{BackendError, BackendRequest};
use crate::mcp::error::McpError;
use crate::mcp::protocol::Tool;
use crate::mcp::tool_registry::{ToolContext, ToolOutput};
use crate::mcp::tools::required_str;

const NODE_STRUCTURE_PATH: &str = "/sap/bc/adt/repository/nodestructure";

pub fn get_object_structure_tool() -> Tool {
    Tool::new(
        "GetObjectStructure",
        "List the components of an ABAP object (includes, methods, attributes) using the repository node structure.",
        json!({
            "type": "object",
            "properties": {
                "object_type": {
                    "type": "string",
                    "description": "ADT object type, e.g. CLAS/OC, PROG/P, FUGR/F, DEVC/K"
                },
                "object_name": {
                    "type": "string",
                    "description": "Name of the object"
                }
            },
            "required": ["object_type", "object_name"]
        }),
    )
}

#[instrument(skip_all, name = "mcp_execute_get_object_structure")]
pub async fn execute_get_object_structure(
    ctx: ToolContext,
    args: Value,
) -> Result<ToolOutput, McpError> {
    let object_type = required_str(&args, "object_type")?.to_ascii_uppercase();
    let object_name = required_str(&args, "object_name")?.to_ascii_uppercase();

    let request = BackendRequest::post(NODE_STRUCTURE_PATH)
        .with_query("parent_type", object_type.as_str())
        .with_query("parent_name", object_name.as_str())
        .with_query("withShortDescriptions", "true")
        .with_header("accept", "application/vnd.sap.as+xml");

    match ctx.connection.request(request).await {
        Ok(response) => Ok(ToolOutput::json(json!({
            "object_type": object_type,
            "object_name": object_name,
            "structure": response.body,
        }))),
        Err(BackendError::Status { status, body }) => {
            Ok(ToolOutput::error(format!("Structure lookup failed with {}: {}", status, body)))
        }
        Err(e) => Err(e.into()),
    }
}
