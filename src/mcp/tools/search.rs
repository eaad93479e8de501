//! MCP Tool for the repository quick search

use serde_json::{json, Value};
use tracing::instrument;

use crate::connection::{BackendError, BackendRequest};
use crate::mcp::error::McpError;
use crate::mcp::protocol::Tool;
use crate::mcp::tool_registry::{ToolContext, ToolOutput};
use crate::mcp::tools::required_str;

const SEARCH_PATH: &str = "/sap/bc/adt/repository/informationsystem/search";
const DEFAULT_MAX_RESULTS: u64 = 50;
const MAX_RESULTS_LIMIT: u64 = 1000;

/// Returns the MCP tool definition for searching repository objects.
///
/// Supports `*` wildcards; a trailing wildcard is added when none is given.
pub fn search_object_tool() -> Tool {
    Tool::new(
        "SearchObject",
        "Search ABAP repository objects by name. Supports * wildcards. Returns the raw ADT object references.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Name pattern, e.g. ZCL_* or ZMY_REPORT"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default: 50, max: 1000)",
                    "minimum": 1,
                    "maximum": 1000,
                    "default": 50
                }
            },
            "required": ["query"]
        }),
    )
}

fn search_pattern(query: &str) -> String {
    if query.contains('*') {
        query.to_string()
    } else {
        format!("{}*", query)
    }
}

#[instrument(skip_all, name = "mcp_execute_search_object")]
pub async fn execute_search_object(ctx: ToolContext, args: Value) -> Result<ToolOutput, McpError> {
    let query = search_pattern(required_str(&args, "query")?);
    let max_results = args
        .get("max_results")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_RESULTS)
        .clamp(1, MAX_RESULTS_LIMIT);

    let request = BackendRequest::get(SEARCH_PATH)
        .with_query("operation", "quickSearch")
        .with_query("query", query.as_str())
        .with_query("maxResults", max_results.to_string());

    match ctx.connection.request(request).await {
        Ok(response) => Ok(ToolOutput::json(json!({
            "query": query,
            "max_results": max_results,
            "references": response.body,
        }))),
        Err(BackendError::Status { status, body }) => {
            Ok(ToolOutput::error(format!("Search failed with {}: {}", status, body)))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern() {
        assert_eq!(search_pattern("ZCL"), "ZCL*");
        assert_eq!(search_pattern("Z*TEST"), "Z*TEST");
    }
}
