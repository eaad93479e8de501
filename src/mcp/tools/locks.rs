//! MCP Tools for object locks
//!
//! Locks live in the backend session, so both calls run stateful and rely on
//! the session cookies recorded after the previous call.

use serde_json::{json, Value};
use tracing::instrument;

use crate::connection::{BackendError, BackendRequest};
use crate::mcp::error::McpError;
use crate::mcp::protocol::Tool;
use crate::mcp::tool_registry::{ToolContext, ToolOutput};
use crate::mcp::tools::{required_str, STATEFUL_SESSION_HEADER};

const LOCK_RESULT_ACCEPT: &str =
    "application/vnd.sap.as+xml;charset=UTF-8;dataname=com.sap.adt.lock.result";

pub fn lock_object_tool() -> Tool {
    Tool::new(
        "LockObject",
        "Lock an ABAP object for modification. Returns the lock handle needed to change or unlock it.",
        json!({
            "type": "object",
            "properties": {
                "object_uri": {
                    "type": "string",
                    "description": "ADT URI of the object, e.g. /sap/bc/adt/programs/programs/zmy_report"
                }
            },
            "required": ["object_uri"]
        }),
    )
}

pub fn unlock_object_tool() -> Tool {
    Tool::new(
        "UnlockObject",
        "Release a lock previously taken with LockObject.",
        json!({
            "type": "object",
            "properties": {
                "object_uri": {
                    "type": "string",
                    "description": "ADT URI of the locked object"
                },
                "lock_handle": {
                    "type": "string",
                    "description": "Lock handle returned by LockObject"
                }
            },
            "required": ["object_uri", "lock_handle"]
        }),
    )
}

fn object_uri(args: &Value) -> Result<&str, McpError> {
    let uri = required_str(args, "object_uri")?;
    if !uri.starts_with("/sap/bc/adt/") {
        return Err(McpError::InvalidParams(format!(
            "object_uri must be an ADT path starting with /sap/bc/adt/: {}",
            uri
        )));
    }
    Ok(uri)
}

/// Text of the `LOCK_HANDLE` element in a lock result
fn lock_handle(body: &str) -> Option<&str> {
    const OPEN: &str = "<LOCK_HANDLE>";
    let start = body.find(OPEN)? + OPEN.len();
    let end = body[start..].find("</LOCK_HANDLE>")? + start;
    Some(body[start..end].trim()).filter(|h| !h.is_empty())
}

#[instrument(skip_all, name = "mcp_execute_lock_object")]
pub async fn execute_lock_object(ctx: ToolContext, args: Value) -> Result<ToolOutput, McpError> {
    let uri = object_uri(&args)?;
    let request = BackendRequest::post(uri)
        .with_query("_action", "LOCK")
        .with_query("accessMode", "MODIFY")
        .with_header(STATEFUL_SESSION_HEADER, "stateful")
        .with_header("accept", LOCK_RESULT_ACCEPT);

    let response = match ctx.connection.request(request).await {
        Ok(response) => response,
        Err(BackendError::Status { status, body }) => {
            return Ok(ToolOutput::error(format!("Lock failed with {}: {}", status, body)))
        }
        Err(e) => return Err(e.into()),
    };

    match lock_handle(&response.body) {
        Some(handle) => {
            tracing::info!(object_uri = %uri, "Object locked");
            Ok(ToolOutput::json(json!({ "object_uri": uri, "lock_handle": handle })))
        }
        None => Ok(ToolOutput::error("Lock result did not contain a lock handle")),
    }
}

#[instrument(skip_all, name = "mcp_execute_unlock_object")]
pub async fn execute_unlock_object(ctx: ToolContext, args: Value) -> Result<ToolOutput, McpError> {
    let uri = object_uri(&args)?;
    let handle = required_str(&args, "lock_handle")?;
    let request = BackendRequest::post(uri)
        .with_query("_action", "UNLOCK")
        .with_query("lockHandle", handle)
        .with_header(STATEFUL_SESSION_HEADER, "stateful");

    match ctx.connection.request(request).await {
        Ok(_) => {
            tracing::info!(object_uri = %uri, "Object unlocked");
            Ok(ToolOutput::json(json!({ "object_uri": uri, "unlocked": true })))
        }
        Err(BackendError::Status { status, body }) => {
            Ok(ToolOutput::error(format!("Unlock failed with {}: {}", status, body)))
        }
        Err(e) => Err(e.into()),
    }
}
