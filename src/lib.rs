//! # ADT MCP Gateway
//!
//! Exposes ABAP Development Tools (ADT) operations as Model Context Protocol
//! tools over stdio, SSE and streamable HTTP.
//!
//! ## Architecture
//!
//! ```text
//! Transport (stdio | SSE | streamable HTTP)
//!      ↓
//! ProtocolHandler → McpServer → ToolRegistry
//!      ↓                ↓
//! SessionManager   ConnectionProvider (local: service keys + brokers,
//!                                      remote: request headers)
//!                       ↓
//!                  BackendConnection → ABAP system
//! ```
//!
//! A connection context is resolved per session (stdio, SSE) or per request
//! (streamable HTTP) and passed explicitly with every tool call.

pub mod auth;
pub mod cli;
pub mod config;
pub mod connection;
pub mod errors;
pub mod gateway;
pub mod mcp;
pub mod observability;

pub use config::GatewayConfig;
pub use errors::{Error, Result};
pub use gateway::GatewayServer;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
