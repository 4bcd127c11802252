//! In-process MCP (Model Context Protocol) servers
//!
//! Tools registered here run inside the orchestrator. The agent reaches them
//! through `mcp_message` control requests; the control engine routes each
//! message to the server named in the request and replies with the server's
//! JSON-RPC response.
//!
//! Supported methods:
//! - `initialize` / `notifications/initialized` - handshake
//! - `tools/list` - lists available tools
//! - `tools/call` - invokes a specific tool
//!
//! Any other method is rejected with [`AgentError::Mcp`](crate::AgentError::Mcp).

pub mod protocol;
mod server;
mod tool;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpError, MCP_PROTOCOL_VERSION};
pub use server::SdkMcpServer;
pub use tool::{SdkMcpTool, ToolContent, ToolResult};

/// Async tool handler: JSON arguments in, [`ToolResult`] out
pub type ToolHandler = Arc<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = crate::error::Result<ToolResult>> + Send>>
        + Send
        + Sync,
>;
