//! Error types for the agent control layer

use thiserror::Error;

/// Main error type for the agent control layer
#[derive(Error, Debug)]
pub enum AgentError {
    /// Agent CLI not found or not installed
    #[error("Agent CLI not found: {0}")]
    CliNotFound(String),

    /// Spawning or attaching to the agent process failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Process execution error with exit code and stderr
    #[error("Process error (exit code {exit_code}): {message}")]
    Process {
        /// Error message
        message: String,
        /// Process exit code
        exit_code: i32,
        /// Standard error output
        stderr: Option<String>,
    },

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Control protocol error
    #[error("Control protocol error: {0}")]
    ControlProtocol(String),

    /// The agent answered an outgoing control request with an error
    #[error("Control request {request_id} failed: {message}")]
    ControlRequestFailed {
        /// Request the error answers
        request_id: String,
        /// Error text sent by the agent
        message: String,
    },

    /// `initialize` was called on an engine that already left the uninitialized state
    #[error("Control engine already initialized")]
    AlreadyInitialized,

    /// A command was issued before the engine finished initialization
    #[error("Control engine not initialized")]
    NotInitialized,

    /// The engine was closed while the operation was outstanding
    #[error("Control engine closed")]
    EngineClosed,

    /// Hook execution error
    #[error("Hook error: {0}")]
    Hook(String),

    /// Permission evaluation or arbitration error
    #[error("Permission error: {0}")]
    Permission(String),

    /// MCP (Model Context Protocol) error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for agent control operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create a CLI not found error with a helpful message
    pub fn cli_not_found() -> Self {
        Self::CliNotFound(
            "Agent CLI not found. Install with:\n\
             npm install -g @anthropic-ai/claude-code\n\
             \n\
             If already installed locally, try:\n\
             export PATH=\"$HOME/node_modules/.bin:$PATH\"\n\
             \n\
             Or set `cli_path` in the engine options"
                .to_string(),
        )
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>, exit_code: i32, stderr: Option<String>) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code,
            stderr,
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a control protocol error
    pub fn control_protocol(msg: impl Into<String>) -> Self {
        Self::ControlProtocol(msg.into())
    }

    /// Create an error for a failed outgoing control request
    pub fn control_request_failed(request_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ControlRequestFailed {
            request_id: request_id.into(),
            message: msg.into(),
        }
    }

    /// Create a hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create a permission error
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    /// Create an MCP error
    pub fn mcp(msg: impl Into<String>) -> Self {
        Self::Mcp(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the error means no further protocol interaction is possible
    pub fn is_process_level(&self) -> bool {
        matches!(
            self,
            Self::CliNotFound(_)
                | Self::Connection(_)
                | Self::Process { .. }
                | Self::Io(_)
                | Self::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::control_request_failed("req_1_abcd", "boom");
        assert_eq!(err.to_string(), "Control request req_1_abcd failed: boom");
        assert_eq!(
            AgentError::AlreadyInitialized.to_string(),
            "Control engine already initialized"
        );
    }

    #[test]
    fn test_process_level_classification() {
        assert!(AgentError::transport("pipe closed").is_process_level());
        assert!(AgentError::connection("spawn failed").is_process_level());
        assert!(!AgentError::mcp("unknown server").is_process_level());
        assert!(!AgentError::EngineClosed.is_process_level());
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{oops");
        let err: AgentError = parse.unwrap_err().into();
        assert!(matches!(err, AgentError::Json(_)));
    }
}
