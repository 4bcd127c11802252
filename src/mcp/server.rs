//! In-process MCP server
//!
//! Hosts [`SdkMcpTool`]s and answers the JSON-RPC messages the agent routes
//! through `mcp_message` control requests.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::protocol::{JsonRpcRequest, JsonRpcResponse, McpError, MCP_PROTOCOL_VERSION};
use super::tool::{SdkMcpTool, ToolResult};
use crate::error::{AgentError, Result};

/// An in-process MCP server that hosts custom tools
///
/// ```rust
/// use agent_control::mcp::{SdkMcpServer, SdkMcpTool, ToolResult};
/// use serde_json::json;
///
/// let server = SdkMcpServer::new("calculator")
///     .version("1.0.0")
///     .tool(SdkMcpTool::new(
///         "add",
///         "Add two numbers",
///         json!({"type": "object"}),
///         |input| async move {
///             let sum = input["a"].as_f64().unwrap_or(0.0) + input["b"].as_f64().unwrap_or(0.0);
///             Ok(ToolResult::text(format!("{sum}")))
///         },
///     ));
/// assert_eq!(server.list_tools().len(), 1);
/// ```
pub struct SdkMcpServer {
    name: String,
    version: String,
    tools: BTreeMap<String, SdkMcpTool>,
}

impl SdkMcpServer {
    /// Create a new MCP server with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            tools: BTreeMap::new(),
        }
    }

    /// Set the server version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Register a tool, replacing any tool with the same name
    pub fn tool(mut self, tool: SdkMcpTool) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Register multiple tools at once
    pub fn tools(self, tools: Vec<SdkMcpTool>) -> Self {
        tools.into_iter().fold(self, Self::tool)
    }

    /// Get the server name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the server version
    pub fn server_version(&self) -> &str {
        &self.version
    }

    /// Get a tool by name
    pub fn get_tool(&self, name: &str) -> Option<&SdkMcpTool> {
        self.tools.get(name)
    }

    /// Get all registered tools, ordered by name
    pub fn list_tools(&self) -> Vec<&SdkMcpTool> {
        self.tools.values().collect()
    }

    /// Entry for this server in the CLI's `--mcp-config`
    pub fn config_entry(&self) -> Value {
        json!({
            "type": "sdk",
            "name": self.name,
        })
    }

    /// Handle a raw JSON-RPC message and produce the JSON-RPC reply
    ///
    /// # Errors
    /// Returns [`AgentError::Mcp`] for malformed messages and unknown methods
    pub async fn handle_message(&self, message: Value) -> Result<Value> {
        let request = JsonRpcRequest::from_value(message)?;
        let response = self.handle_request(request).await?;
        Ok(serde_json::to_value(response)?)
    }

    /// Handle a parsed JSON-RPC request
    ///
    /// # Errors
    /// Returns [`AgentError::Mcp`] for unknown methods
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let request_id = request.id.clone().unwrap_or(Value::Null);
        debug!(server = %self.name, method = %request.method, "Handling MCP request");

        match request.method.as_str() {
            "initialize" => Ok(JsonRpcResponse::success(request_id, self.initialize_result())),
            "notifications/initialized" => Ok(JsonRpcResponse::success(request_id, json!({}))),
            "tools/list" => {
                let tools: Vec<Value> = self.tools.values().map(SdkMcpTool::to_tool_info).collect();
                Ok(JsonRpcResponse::success(request_id, json!({ "tools": tools })))
            }
            "tools/call" => self.handle_tools_call(request_id, request.params).await,
            other => Err(AgentError::mcp(format!(
                "Method '{other}' not supported by server '{}'",
                self.name
            ))),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": self.name,
                "version": self.version,
            },
        })
    }

    async fn handle_tools_call(
        &self,
        request_id: Value,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse> {
        let Some(params) = params else {
            return Ok(JsonRpcResponse::error(
                request_id,
                McpError::invalid_params("tools/call requires parameters"),
            ));
        };
        let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
            return Ok(JsonRpcResponse::error(
                request_id,
                McpError::invalid_params("Missing tool name in parameters"),
            ));
        };
        let Some(tool) = self.tools.get(tool_name) else {
            return Ok(JsonRpcResponse::error(
                request_id,
                McpError::tool_not_found(tool_name),
            ));
        };

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let result = match tool.invoke(arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!(server = %self.name, tool = %tool_name, error = %e, "MCP tool failed");
                ToolResult::error(format!("Tool execution failed: {e}"))
            }
        };
        Ok(JsonRpcResponse::success(request_id, serde_json::to_value(result)?))
    }
}

impl std::fmt::Debug for SdkMcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkMcpServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}
