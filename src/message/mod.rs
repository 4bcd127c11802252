//! Message decoding
//!
//! This module turns single lines of agent output into typed [`Response`]
//! values. The same decoder serves live streams and transcript replay.

pub mod decoder;
pub mod response;

pub use decoder::{decode_line, decode_value};
pub use response::{
    AssistantResponse, CompactBoundaryResponse, CompletionResponse, ErrorResponse, Response,
    ResultResponse, Role, StatusResponse, TextResponse, ThinkingResponse, ToolResultResponse,
    ToolUseResponse, UnknownResponse, Usage, UserResponse,
};
