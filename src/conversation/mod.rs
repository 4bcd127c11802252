//! Conversation replay from persisted transcripts
//!
//! A transcript is the agent's own JSON Lines log of a session. Replaying it
//! through [`ConversationReconstructor`] yields the display-ready message
//! list: streamed assistant fragments sharing a message id are merged, tool
//! results are folded into the assistant message that requested them, and
//! transient events (status, completion, meta lines) are dropped.
//!
//! # Example
//!
//! ```
//! use agent_control::conversation::reconstruct;
//! use agent_control::message::Role;
//!
//! let conversation = reconstruct([
//!     r#"{"type":"user","message":{"role":"user","content":"hi"}}"#,
//!     r#"{"type":"assistant","message":{"id":"m1","content":[{"type":"text","text":"hello"}]}}"#,
//! ]);
//! assert_eq!(conversation.messages.len(), 2);
//! assert_eq!(conversation.messages[1].role, Role::Assistant);
//! ```

mod reconstruct;
mod store;

use serde::Serialize;

use crate::message::{Response, Role, Usage};

pub use reconstruct::{reconstruct, ConversationReconstructor};
pub use store::{SessionSummary, TranscriptStore};

/// One display message assembled from transcript fragments
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    /// Author of the message
    pub role: Role,
    /// Ordered fragments
    pub responses: Vec<Response>,
    /// Always true for replayed messages
    pub is_complete: bool,
    /// Always false for replayed messages
    pub is_streaming: bool,
    /// Upstream message id (assistant messages only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ConversationMessage {
    pub(crate) fn new(role: Role, first: Response, message_id: Option<String>) -> Self {
        Self {
            role,
            responses: vec![first],
            is_complete: true,
            is_streaming: false,
            message_id,
        }
    }

    /// Concatenated text of all text fragments
    pub fn text(&self) -> String {
        self.responses
            .iter()
            .filter_map(|response| match response {
                Response::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of a full replay
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Conversation {
    /// Messages in transcript order
    pub messages: Vec<ConversationMessage>,
    /// Last usage snapshot seen, if any
    pub usage: Option<Usage>,
}
