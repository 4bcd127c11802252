//! Type definitions for the agent control layer
//!
//! This module contains the newtypes, permission and hook types, outgoing
//! user-message content, and the [`EngineOptions`] configuration shared by the
//! transport and the control engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::mcp::SdkMcpServer;
use crate::permissions::PermissionArbitrator;

// ============================================================================
// Newtype Wrappers for Type Safety
// ============================================================================

/// Session ID newtype for type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the session ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tool name newtype
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    /// Create a new tool name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the tool name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ToolName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ToolName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Request ID newtype for the control protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new request ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the request ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hook callback ID, unique for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(String);

impl CallbackId {
    /// Create a new callback ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the callback ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallbackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Permission Types
// ============================================================================

/// Permission modes for tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Default mode - the agent asks before dangerous tools
    Default,
    /// Auto-accept file edits
    AcceptEdits,
    /// Plan mode
    Plan,
    /// Allow all tools (use with caution)
    BypassPermissions,
}

impl PermissionMode {
    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Permission update destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionUpdateDestination {
    /// Save to user settings
    UserSettings,
    /// Save to project settings
    ProjectSettings,
    /// Save to local settings
    LocalSettings,
    /// Save to session only (temporary)
    Session,
}

/// Permission behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionBehavior {
    /// Allow the action
    Allow,
    /// Deny the action
    Deny,
    /// Ask the user
    Ask,
}

/// Permission rule value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRuleValue {
    /// Name of the tool
    pub tool_name: String,
    /// Optional rule content, e.g. `ls:*` for `Bash(ls:*)`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_content: Option<String>,
}

/// Permission update suggested by the agent or returned by a callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionUpdate {
    /// Add permission rules
    AddRules {
        /// Rules to add
        #[serde(default)]
        rules: Vec<PermissionRuleValue>,
        /// Behavior the rules grant
        #[serde(skip_serializing_if = "Option::is_none")]
        behavior: Option<PermissionBehavior>,
        /// Where to save the rules
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Replace existing permission rules
    ReplaceRules {
        /// New rules
        #[serde(default)]
        rules: Vec<PermissionRuleValue>,
        /// Behavior the rules grant
        #[serde(skip_serializing_if = "Option::is_none")]
        behavior: Option<PermissionBehavior>,
        /// Where to save the rules
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Remove permission rules
    RemoveRules {
        /// Rules to remove
        #[serde(default)]
        rules: Vec<PermissionRuleValue>,
        /// Where to remove from
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Set permission mode
    SetMode {
        /// New permission mode
        mode: PermissionMode,
        /// Where to save the mode
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Add directories to allowed list
    AddDirectories {
        /// Directories to add
        #[serde(default)]
        directories: Vec<String>,
        /// Where to save
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
}

impl PermissionUpdate {
    /// Render the rules of this update as `Tool(content)` patterns
    pub fn rule_patterns(&self) -> Vec<String> {
        let rules = match self {
            PermissionUpdate::AddRules { rules, .. }
            | PermissionUpdate::ReplaceRules { rules, .. }
            | PermissionUpdate::RemoveRules { rules, .. } => rules,
            _ => return Vec::new(),
        };
        rules
            .iter()
            .map(|rule| match &rule.rule_content {
                Some(content) => format!("{}({})", rule.tool_name, content),
                None => rule.tool_name.clone(),
            })
            .collect()
    }
}

/// Context handed to tool permission callbacks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPermissionContext {
    /// Permission suggestions from the agent
    pub suggestions: Vec<PermissionUpdate>,
    /// Path outside the allowed directories that triggered the check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_path: Option<String>,
    /// Tool use this check belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

/// Permission result for allowing tool use
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionResultAllow {
    /// Modified input for the tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<serde_json::Value>,
    /// Permission updates to apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_permissions: Option<Vec<PermissionUpdate>>,
}

/// Permission result for denying tool use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionResultDeny {
    /// Reason for denying
    pub message: String,
    /// Whether to interrupt the conversation
    #[serde(default)]
    pub interrupt: bool,
}

/// Permission result enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PermissionResult {
    /// Allow the tool use
    Allow(PermissionResultAllow),
    /// Deny the tool use
    Deny(PermissionResultDeny),
}

impl PermissionResult {
    /// Allow without modifying the input
    pub fn allow() -> Self {
        PermissionResult::Allow(PermissionResultAllow::default())
    }

    /// Allow with a rewritten tool input
    pub fn allow_with_input(input: serde_json::Value) -> Self {
        PermissionResult::Allow(PermissionResultAllow {
            updated_input: Some(input),
            updated_permissions: None,
        })
    }

    /// Deny with a message, without interrupting the agent
    pub fn deny(message: impl Into<String>) -> Self {
        PermissionResult::Deny(PermissionResultDeny {
            message: message.into(),
            interrupt: false,
        })
    }

    /// Whether this result allows the tool use
    pub fn is_allow(&self) -> bool {
        matches!(self, PermissionResult::Allow(_))
    }
}

/// Callback type for tool permission checks
pub type CanUseToolCallback = Arc<
    dyn Fn(
            ToolName,
            serde_json::Value,
            ToolPermissionContext,
        ) -> Pin<Box<dyn Future<Output = Result<PermissionResult>> + Send>>
        + Send
        + Sync,
>;

// ============================================================================
// Hook Types
// ============================================================================

/// Hook event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// Before a tool is used
    PreToolUse,
    /// After a tool is used
    PostToolUse,
    /// When user submits a prompt
    UserPromptSubmit,
    /// When conversation stops
    Stop,
    /// When a subagent stops
    SubagentStop,
    /// Before compacting the conversation
    PreCompact,
}

impl HookEvent {
    /// Event name as used in the initialize hook table
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::Stop => "Stop",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::PreCompact => "PreCompact",
        }
    }
}

/// Hook decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    /// Block the action
    Block,
}

/// Permission decision a pre-tool-use hook can force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPermissionDecision {
    /// Allow the tool use without asking
    Allow,
    /// Deny the tool use
    Deny,
    /// Fall back to asking the user
    Ask,
}

/// Event-specific part of a hook output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    /// Event the output belongs to
    pub hook_event_name: String,
    /// Permission override (pre-tool-use only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<HookPermissionDecision>,
    /// Reason shown alongside the permission override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    /// Rewritten tool input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<serde_json::Value>,
    /// Extra context injected into the conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

/// Hook output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookOutput {
    /// Whether the agent should keep going after the hook
    #[serde(skip_serializing_if = "Option::is_none", rename = "continue")]
    pub continue_: Option<bool>,
    /// Message shown when `continue` is false
    #[serde(skip_serializing_if = "Option::is_none", rename = "stopReason")]
    pub stop_reason: Option<String>,
    /// Decision to block the action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,
    /// System message to add
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemMessage")]
    pub system_message: Option<String>,
    /// Reason fed back to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Hook-specific output data
    #[serde(skip_serializing_if = "Option::is_none", rename = "hookSpecificOutput")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookOutput {
    /// Allow, no modification
    pub fn allow() -> Self {
        Self {
            continue_: Some(true),
            ..Default::default()
        }
    }

    /// Stop the session with a reason
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            continue_: Some(false),
            stop_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Force a pre-tool-use permission decision
    pub fn permission(decision: HookPermissionDecision, reason: impl Into<String>) -> Self {
        Self {
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: HookEvent::PreToolUse.as_str().to_string(),
                permission_decision: Some(decision),
                permission_decision_reason: Some(reason.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Context for hook callbacks
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// Session that triggered the hook, when the agent reports one
    pub session_id: Option<SessionId>,
}

/// Hook callback type
///
/// Called with the hook input payload, the tool-use id (if any) and a context.
pub type HookCallback = Arc<
    dyn Fn(
            serde_json::Value,
            Option<String>,
            HookContext,
        ) -> Pin<Box<dyn Future<Output = Result<HookOutput>> + Send>>
        + Send
        + Sync,
>;

/// Hook matcher configuration
#[derive(Clone)]
pub struct HookMatcher {
    /// Matcher pattern (e.g., tool name like "Bash" or pattern like "Write|Edit")
    pub matcher: Option<String>,
    /// List of hook callbacks
    pub hooks: Vec<HookCallback>,
    /// Timeout the agent applies to each callback
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("matcher", &self.matcher)
            .field("hooks", &format!("[{} callbacks]", self.hooks.len()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// User Message Content
// ============================================================================

/// Content block of an outgoing user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content block
    Text {
        /// Text content
        text: String,
    },
    /// Image attachment
    Image {
        /// Image source, e.g. `{"type":"base64","media_type":"image/png","data":"..."}`
        source: serde_json::Value,
    },
    /// Document attachment
    Document {
        /// Document source
        source: serde_json::Value,
    },
}

/// User content can be string or blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    /// Plain string content
    String(String),
    /// Structured content blocks
    Blocks(Vec<ContentBlock>),
}

impl From<String> for UserContent {
    fn from(s: String) -> Self {
        UserContent::String(s)
    }
}

impl From<&str> for UserContent {
    fn from(s: &str) -> Self {
        UserContent::String(s.to_string())
    }
}

impl From<Vec<ContentBlock>> for UserContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        UserContent::Blocks(blocks)
    }
}

// ============================================================================
// Engine Options
// ============================================================================

/// Options for spawning an agent process and running its control engine
#[derive(Clone, Default)]
pub struct EngineOptions {
    /// Explicit path to the agent CLI (searched on `PATH` if unset)
    pub cli_path: Option<PathBuf>,
    /// Working directory for the agent process
    pub cwd: Option<PathBuf>,
    /// Model to use
    pub model: Option<String>,
    /// Permission mode at startup
    pub permission_mode: Option<PermissionMode>,
    /// Session ID to resume from
    pub resume: Option<SessionId>,
    /// Whether to continue the most recent conversation
    pub continue_conversation: bool,
    /// Environment variables for the agent process
    pub env: HashMap<String, String>,
    /// Extra CLI arguments (only allow-listed flags are passed through)
    pub extra_args: HashMap<String, Option<String>>,
    /// Maximum length of one output line (default: 1MB)
    pub max_buffer_size: Option<usize>,
    /// Callback for tool permission checks
    pub can_use_tool: Option<CanUseToolCallback>,
    /// Hook configurations
    pub hooks: HashMap<HookEvent, Vec<HookMatcher>>,
    /// In-process MCP servers, keyed by server name
    pub mcp_servers: HashMap<String, Arc<SdkMcpServer>>,
    /// Arbitrator cancelled when the engine closes
    pub arbitrator: Option<Arc<PermissionArbitrator>>,
}

impl EngineOptions {
    /// Create a new builder for EngineOptions
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::default()
    }

    /// Whether the engine must send `initialize` before use
    pub fn needs_initialize(&self) -> bool {
        self.can_use_tool.is_some() || self.hooks.values().any(|matchers| !matchers.is_empty())
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("cli_path", &self.cli_path)
            .field("cwd", &self.cwd)
            .field("model", &self.model)
            .field("permission_mode", &self.permission_mode)
            .field("resume", &self.resume)
            .field("continue_conversation", &self.continue_conversation)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("extra_args", &self.extra_args)
            .field("max_buffer_size", &self.max_buffer_size)
            .field(
                "can_use_tool",
                &self.can_use_tool.as_ref().map(|_| "<callback>"),
            )
            .field("hooks", &format!("[{} hook types]", self.hooks.len()))
            .field("mcp_servers", &self.mcp_servers.keys().collect::<Vec<_>>())
            .field("arbitrator", &self.arbitrator.is_some())
            .finish()
    }
}

// ============================================================================
// Builder for EngineOptions
// ============================================================================

/// Builder for EngineOptions
#[derive(Debug, Default)]
pub struct EngineOptionsBuilder {
    options: EngineOptions,
}

impl EngineOptionsBuilder {
    /// Set the CLI path
    pub fn cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cli_path = Some(path.into());
        self
    }

    /// Set working directory
    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(path.into());
        self
    }

    /// Set AI model to use
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    /// Set permission mode
    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.options.permission_mode = Some(mode);
        self
    }

    /// Resume from a specific session ID
    pub fn resume(mut self, session_id: impl Into<SessionId>) -> Self {
        self.options.resume = Some(session_id.into());
        self
    }

    /// Continue from the previous conversation
    pub fn continue_conversation(mut self, continue_conv: bool) -> Self {
        self.options.continue_conversation = continue_conv;
        self
    }

    /// Set an environment variable for the agent process
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.insert(key.into(), value.into());
        self
    }

    /// Add an extra CLI flag
    pub fn extra_arg(mut self, flag: impl Into<String>, value: Option<String>) -> Self {
        self.options.extra_args.insert(flag.into(), value);
        self
    }

    /// Set the maximum output line length
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.options.max_buffer_size = Some(size);
        self
    }

    /// Set can_use_tool callback
    pub fn can_use_tool(mut self, callback: CanUseToolCallback) -> Self {
        self.options.can_use_tool = Some(callback);
        self
    }

    /// Add a hook matcher for an event
    pub fn hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.options.hooks.entry(event).or_default().push(matcher);
        self
    }

    /// Set hooks
    pub fn hooks(mut self, hooks: HashMap<HookEvent, Vec<HookMatcher>>) -> Self {
        self.options.hooks = hooks;
        self
    }

    /// Register an in-process MCP server under its own name
    pub fn mcp_server(mut self, server: SdkMcpServer) -> Self {
        self.options
            .mcp_servers
            .insert(server.name().to_string(), Arc::new(server));
        self
    }

    /// Attach a permission arbitrator to cancel on close
    pub fn arbitrator(mut self, arbitrator: Arc<PermissionArbitrator>) -> Self {
        self.options.arbitrator = Some(arbitrator);
        self
    }

    /// Build the options
    pub fn build(self) -> EngineOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permission_update_deserialize() {
        let update: PermissionUpdate = serde_json::from_value(json!({
            "type": "addRules",
            "rules": [{"toolName": "Bash", "ruleContent": "ls:*"}],
            "behavior": "allow",
            "destination": "session"
        }))
        .unwrap();

        assert_eq!(update.rule_patterns(), vec!["Bash(ls:*)".to_string()]);
    }

    #[test]
    fn test_hook_output_wire_names() {
        let output = HookOutput::permission(HookPermissionDecision::Deny, "not here");
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(
            value,
            json!({
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "deny",
                    "permissionDecisionReason": "not here"
                }
            })
        );

        let value = serde_json::to_value(HookOutput::stop("done")).unwrap();
        assert_eq!(value, json!({"continue": false, "stopReason": "done"}));
    }

    #[test]
    fn test_user_content_serialization() {
        let text: UserContent = "hello".into();
        assert_eq!(serde_json::to_value(&text).unwrap(), json!("hello"));

        let blocks = UserContent::Blocks(vec![ContentBlock::Text {
            text: "look".to_string(),
        }]);
        assert_eq!(
            serde_json::to_value(&blocks).unwrap(),
            json!([{"type": "text", "text": "look"}])
        );
    }

    #[test]
    fn test_needs_initialize() {
        assert!(!EngineOptions::default().needs_initialize());

        let callback = crate::permissions::PermissionManager::callback(|_, _, _| async {
            Ok(PermissionResult::allow())
        });
        let options = EngineOptions::builder().can_use_tool(callback).build();
        assert!(options.needs_initialize());
    }

    #[test]
    fn test_permission_mode_wire_name() {
        assert_eq!(PermissionMode::AcceptEdits.as_str(), "acceptEdits");
        assert_eq!(
            serde_json::to_value(PermissionMode::BypassPermissions).unwrap(),
            json!("bypassPermissions")
        );
    }
}
