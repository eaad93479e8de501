//! MCP Tools for reading ABAP source
//!
//! Read-only access to program and class source code.

use serde_json::{json, Value};
use tracing::instrument;

use crate::connection::BackendRequest;
use crate::mcp::error::McpError;
use crate::mcp::protocol::Tool;
use crate::mcp::tool_registry::{ToolContext, ToolOutput};
use crate::mcp::tools::{fetch_text, object_segment, required_str};

/// Returns the MCP tool definition for reading program source.
pub fn get_program_tool() -> Tool {
    Tool::new(
        "GetProgram",
        "Read the source code of an ABAP program (report). Returns the main source as plain text.",
        json!({
            "type": "object",
            "properties": {
                "program_name": {
                    "type": "string",
                    "description": "Name of the program, e.g. ZMY_REPORT"
                }
            },
            "required": ["program_name"]
        }),
    )
}

/// Returns the MCP tool definition for reading class source.
pub fn get_class_tool() -> Tool {
    Tool::new(
        "GetClass",
        "Read the source code of an ABAP class. Returns the main source as plain text.",
        json!({
            "type": "object",
            "properties": {
                "class_name": {
                    "type": "string",
                    "description": "Name of the class, e.g. ZCL_MY_CLASS"
                }
            },
            "required": ["class_name"]
        }),
    )
}

#[instrument(skip_all, name = "mcp_execute_get_program")]
pub async fn execute_get_program(ctx: ToolContext, args: Value) -> Result<ToolOutput, McpError> {
    let name = required_str(&args, "program_name")?;
    let path = format!("/sap/bc/adt/programs/programs/{}/source/main", object_segment(name));
    tracing::debug!(program = %name, "Reading program source");

    fetch_text(ctx.connection.as_ref(), BackendRequest::get(path).with_header("accept", "text/plain"))
        .await
}

#[instrument(skip_all, name = "mcp_execute_get_class")]
pub async fn execute_get_class(ctx: ToolContext, args: Value) -> Result<ToolOutput, McpError> {
    let name = required_str(&args, "class_name")?;
    let path = format!("/sap/bc/adt/oo/classes/{}/source/main", object_segment(name));
    tracing::debug!(class = %name, "Reading class source");

    fetch_text(ctx.connection.as_ref(), BackendRequest::get(path).with_header("accept", "text/plain"))
        .await
}
