//! Typed responses produced by the line decoder

use serde::{Deserialize, Serialize};

use crate::control::{ControlResponseEnvelope, IncomingControlRequest};

/// Who a fragment or message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Written by the user (or by tools on the user's behalf)
    User,
    /// Written by the model
    Assistant,
    /// Anything else, e.g. errors and compaction markers
    Other,
}

/// Token usage reported by the agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens
    #[serde(default)]
    pub output_tokens: u64,
    /// Input tokens served from the prompt cache
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    /// Input tokens written to the prompt cache
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

/// Plain text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextResponse {
    /// Text content
    pub text: String,
    /// Author of the text
    pub role: Role,
}

/// Extended thinking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinkingResponse {
    /// Thinking content
    pub thinking: String,
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUseResponse {
    /// Tool use ID
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool input parameters
    pub input: serde_json::Value,
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResultResponse {
    /// ID of the tool use this is a result for
    pub tool_use_id: String,
    /// Result content (string or content blocks)
    pub content: serde_json::Value,
    /// Whether the tool failed
    pub is_error: bool,
}

/// Progress or system notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    /// Status or system subtype, e.g. `init`
    pub status: String,
    /// Session the notification belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Full decoded line
    pub raw: serde_json::Value,
}

/// Marker left where the conversation was compacted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactBoundaryResponse {
    /// `manual` or `auto`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Token count before compaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_tokens: Option<u64>,
}

/// Error reported by the agent or synthesized by the reader
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// Error category, e.g. `CLI Error`
    pub error: String,
    /// Human-readable details
    pub message: String,
}

impl ErrorResponse {
    /// Create an error response
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Final result of one agent turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultResponse {
    /// Result subtype, e.g. `success`
    pub subtype: String,
    /// Whether the turn ended in an error
    pub is_error: bool,
    /// Final text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Session ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Total duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Total cost in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Terminal event of a process lifetime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResponse {
    /// Why the stream ended
    pub stop_reason: String,
}

impl CompletionResponse {
    /// Stop reason emitted when the process output ends
    pub const PROCESS_ENDED: &'static str = "process_ended";

    /// Completion for a finished process
    pub fn process_ended() -> Self {
        Self {
            stop_reason: Self::PROCESS_ENDED.to_string(),
        }
    }
}

/// Assistant message envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantResponse {
    /// Upstream message identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Model that generated the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Unwrapped content fragments
    pub content: Vec<Response>,
    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Parent tool use for sub-agent output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

/// User message envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserResponse {
    /// Transcript entry identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Unwrapped content fragments
    pub content: Vec<Response>,
}

/// Line that could not be classified
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnknownResponse {
    /// Original text
    pub raw: String,
}

/// Typed response decoded from one output line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Plain text
    Text(TextResponse),
    /// Extended thinking
    Thinking(ThinkingResponse),
    /// Tool invocation
    ToolUse(ToolUseResponse),
    /// Tool result
    ToolResult(ToolResultResponse),
    /// Status or system notification
    Status(StatusResponse),
    /// Compaction marker
    CompactBoundary(CompactBoundaryResponse),
    /// Error
    Error(ErrorResponse),
    /// Turn result
    Result(ResultResponse),
    /// End of process output
    Completion(CompletionResponse),
    /// Assistant message envelope
    Assistant(AssistantResponse),
    /// User message envelope
    User(UserResponse),
    /// Control request from the agent
    ControlRequest(IncomingControlRequest),
    /// Control response to one of our requests
    ControlResponse(ControlResponseEnvelope),
    /// Unrecognized or malformed line
    Unknown(UnknownResponse),
}

impl Response {
    /// Whether this response belongs to the control protocol
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Response::ControlRequest(_) | Response::ControlResponse(_)
        )
    }

    /// Upstream message identifier, if the line carries one
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Response::Assistant(assistant) => assistant.message_id.as_deref(),
            _ => None,
        }
    }

    /// Usage snapshot carried by the line
    pub fn usage(&self) -> Option<Usage> {
        match self {
            Response::Assistant(assistant) => assistant.usage,
            Response::Result(result) => result.usage,
            _ => None,
        }
    }

    /// Role of a single (already unwrapped) fragment
    pub fn role(&self) -> Role {
        match self {
            Response::Text(text) => text.role,
            Response::Thinking(_) | Response::ToolUse(_) | Response::Assistant(_) => {
                Role::Assistant
            }
            Response::ToolResult(_) | Response::User(_) => Role::User,
            _ => Role::Other,
        }
    }

    /// Flatten message envelopes into their ordered fragments
    ///
    /// Non-envelope responses yield themselves.
    pub fn into_fragments(self) -> Vec<Response> {
        match self {
            Response::Assistant(assistant) => assistant.content,
            Response::User(user) => user.content,
            other => vec![other],
        }
    }
}
