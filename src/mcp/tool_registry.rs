//! MCP Tool Registry
//!
//! Tools are registered once, at start-up, and the registry is shared by every
//! transport, connection and request. How a handler is called is fixed at
//! registration through [`HandlerKind`]:
//!
//! - `Contextual` handlers receive a [`ToolContext`] and the call arguments.
//! - `Legacy` handlers receive a single [`LegacyCall`] bundling the connection
//!   with the arguments.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::BackendConnection;
use crate::mcp::error::McpError;
use crate::mcp::protocol::Tool;
use crate::mcp::session::SessionId;

/// Capability tier a tool belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolGroup {
    ReadOnly,
    HighLevel,
    LowLevel,
    System,
    Search,
}

impl ToolGroup {
    pub const fn all() -> &'static [ToolGroup] {
        &[
            ToolGroup::ReadOnly,
            ToolGroup::HighLevel,
            ToolGroup::LowLevel,
            ToolGroup::System,
            ToolGroup::Search,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolGroup::ReadOnly => "read-only",
            ToolGroup::HighLevel => "high-level",
            ToolGroup::LowLevel => "low-level",
            ToolGroup::System => "system",
            ToolGroup::Search => "search",
        }
    }
}

impl std::fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call context for contextual handlers
#[derive(Clone)]
pub struct ToolContext {
    pub connection: Arc<dyn BackendConnection>,
    pub session_id: SessionId,
    pub destination: Option<String>,
    pub span: tracing::Span,
}

/// Single argument for legacy handlers
#[derive(Clone)]
pub struct LegacyCall {
    pub connection: Arc<dyn BackendConnection>,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text(String),
    /// Serialized to pretty-printed text before leaving the server
    Json(Value),
}

/// What a handler returns
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { content: vec![ToolContent::Text(text.into())], is_error: false }
    }

    pub fn json(value: Value) -> Self {
        Self { content: vec![ToolContent::Json(value)], is_error: false }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { content: vec![ToolContent::Text(message.into())], is_error: true }
    }
}

pub type ToolFuture = BoxFuture<'static, Result<ToolOutput, McpError>>;
pub type ContextualHandler = Arc<dyn Fn(ToolContext, Value) -> ToolFuture + Send + Sync>;
pub type LegacyHandler = Arc<dyn Fn(LegacyCall) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
pub enum HandlerKind {
    Contextual(ContextualHandler),
    Legacy(LegacyHandler),
}

#[derive(Clone)]
pub struct ToolEntry {
    pub definition: Tool,
    pub group: ToolGroup,
    pub handler: HandlerKind,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_contextual<F, Fut>(
        &mut self,
        group: ToolGroup,
        definition: Tool,
        handler: F,
    ) -> Result<(), McpError>
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, McpError>> + Send + 'static,
    {
        let handler: ContextualHandler = Arc::new(move |ctx, args| handler(ctx, args).boxed());
        self.insert(ToolEntry { definition, group, handler: HandlerKind::Contextual(handler) })
    }

    pub fn register_legacy<F, Fut>(
        &mut self,
        group: ToolGroup,
        definition: Tool,
        handler: F,
    ) -> Result<(), McpError>
    where
        F: Fn(LegacyCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, McpError>> + Send + 'static,
    {
        let handler: LegacyHandler = Arc::new(move |call| handler(call).boxed());
        self.insert(ToolEntry { definition, group, handler: HandlerKind::Legacy(handler) })
    }

    fn insert(&mut self, entry: ToolEntry) -> Result<(), McpError> {
        if self.index.contains_key(&entry.definition.name) {
            return Err(McpError::InternalError(format!(
                "tool '{}' registered twice",
                entry.definition.name
            )));
        }
        self.index.insert(entry.definition.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> Vec<Tool> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    /// Keep only tools of the given groups
    pub fn with_groups(mut self, groups: &[ToolGroup]) -> Self {
        self.entries.retain(|e| groups.contains(&e.group));
        self.index =
            self.entries.iter().enumerate().map(|(i, e)| (e.definition.name.clone(), i)).collect();
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
