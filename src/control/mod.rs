//! Control protocol between the orchestrator and an agent process
//!
//! The control protocol shares the agent's JSON Lines stream with ordinary
//! conversation messages. It carries:
//! - requests from the agent: permission checks (`can_use_tool`), hook
//!   invocations (`hook_callback`) and in-process MCP traffic (`mcp_message`)
//! - commands from the engine: `initialize`, `interrupt`,
//!   `set_permission_mode`, `set_model`, `rewind_files`
//!
//! ## Message Flow
//!
//! ```text
//! Engine                         Agent
//!  |                               |
//!  |--- initialize (hooks) ------->|
//!  |<-- control_response ----------|
//!  |--- user message ------------->|
//!  |<-- assistant message ---------|
//!  |<-- can_use_tool --------------|
//!  |--- control_response --------->|
//!  |<-- hook_callback -------------|
//!  |--- control_response --------->|
//!  |--- interrupt ---------------->|
//!  |<-- result message ------------|
//! ```

pub mod engine;
pub mod protocol;

pub use engine::{ControlEngine, EngineState};
pub use protocol::{
    ControlCommand, ControlRequestKind, ControlResponseEnvelope, IncomingControlRequest,
    PendingRequests, RequestIdGenerator,
};
