//! # Agent Control
//!
//! Process control layer for long-running agent CLIs that speak JSON Lines
//! over stdin/stdout. The crate drives one agent process per
//! [`ControlEngine`], answers the agent's permission, hook and in-process
//! tool requests, and replays persisted transcripts into display-ready
//! conversations.
//!
//! ## Quick Start
//!
//! ```no_run
//! use agent_control::{ControlEngine, EngineOptions, Response};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ControlEngine::spawn(EngineOptions::default()).await?;
//!     let mut events = engine.subscribe();
//!
//!     engine.send_message("What is 2 + 2?").await?;
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             Response::Assistant(message) => println!("Agent: {:?}", message.content),
//!             Response::Result(_) => break,
//!             _ => {}
//!         }
//!     }
//!
//!     engine.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Features
//!
//! ### 1. Line Decoding with [`decode_line()`]
//!
//! Every output line decodes into a typed [`Response`]. Decoding never fails;
//! anything unrecognized becomes [`Response::Unknown`] carrying the raw text.
//!
//! ```
//! use agent_control::{decode_line, Response};
//!
//! assert!(matches!(decode_line("not json"), Response::Unknown(_)));
//! assert!(matches!(
//!     decode_line(r#"{"type":"text","text":"hi"}"#),
//!     Response::Text(_)
//! ));
//! ```
//!
//! ### 2. Permission Arbitration
//!
//! Rule evaluation happens in [`PermissionManager`]; whatever the rules leave
//! open is forwarded to a [`PermissionArbitrator`], which publishes a
//! `permission-request` event and waits for an answer or a timeout.
//!
//! ```no_run
//! # use agent_control::permissions::*;
//! # use agent_control::EngineOptions;
//! # use std::sync::Arc;
//! let (sink, _requests) = ChannelEventSink::new();
//! let arbitrator = Arc::new(PermissionArbitrator::new(
//!     ArbitratorConfig::default(),
//!     Arc::new(sink),
//!     Arc::new(AtomicSequence::new()),
//! ));
//!
//! let callback = PermissionManager::new(PermissionRules::default().allow("Read|Glob"))
//!     .into_callback(Arc::clone(&arbitrator), AgentIdentity::new("agent-1", "main"));
//!
//! let options = EngineOptions::builder()
//!     .can_use_tool(callback)
//!     .arbitrator(arbitrator)
//!     .build();
//! ```
//!
//! ### 3. Hooks and In-Process Tools
//!
//! Hooks are registered during the `initialize` handshake; in-process MCP
//! servers answer the agent's `mcp_message` requests. See the [`hooks`] and
//! [`mcp`] modules.
//!
//! ### 4. Transcript Replay
//!
//! ```no_run
//! # use agent_control::conversation::TranscriptStore;
//! # async fn example() -> agent_control::Result<()> {
//! let store = TranscriptStore::open_default()?;
//! for session in store.list_sessions("-home-me-app").await? {
//!     let conversation = store.load_conversation("-home-me-app", &session.session_id).await?;
//!     println!("{}: {} messages", session.session_id, conversation.messages.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`message`]: Line decoder and typed responses
//! - [`transport`]: Process I/O, stream reader and broadcast fan-out
//! - [`control`]: Control protocol engine
//! - [`hooks`]: Hook callback registry
//! - [`mcp`]: In-process MCP servers
//! - [`permissions`]: Rule evaluation and interactive arbitration
//! - [`conversation`]: Transcript replay
//! - [`types`]: Options, newtypes and callback types
//! - [`error`]: Error types
//!
//! ## Feature Flags
//!
//! - `tracing-support` - Enables `logging::init_tracing` (requires `tracing-subscriber`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod conversation;
pub mod error;
pub mod hooks;
#[cfg(feature = "tracing-support")]
pub mod logging;
pub mod mcp;
pub mod message;
pub mod permissions;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use control::{ControlEngine, EngineState};
pub use conversation::{reconstruct, Conversation, ConversationMessage, ConversationReconstructor};
pub use error::{AgentError, Result};
pub use hooks::{HookMatcherBuilder, HookRegistry};
pub use message::{decode_line, decode_value, Response, Role, Usage};
pub use permissions::{
    AgentIdentity, ArbitratorConfig, PermissionArbitrator, PermissionManager, PermissionRules,
    PermissionVerdict,
};
pub use transport::{PipePeer, PipeTransport, StreamReader, SubprocessTransport, Transport};
pub use types::{
    CanUseToolCallback, ContentBlock, EngineOptions, EngineOptionsBuilder, HookCallback,
    HookContext, HookEvent, HookMatcher, HookOutput, PermissionMode, PermissionResult,
    PermissionUpdate, RequestId, SessionId, ToolName, ToolPermissionContext, UserContent,
};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
