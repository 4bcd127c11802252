//! Transcript replay and message merging

use serde_json::Value;
use tracing::{debug, trace};

use super::{Conversation, ConversationMessage};
use crate::message::{decode_value, Response, Role, Usage};

/// Incremental transcript replayer
///
/// Feed lines in file order with [`push_line`](Self::push_line); lines are
/// never reordered and a malformed line only loses itself.
#[derive(Debug, Default)]
pub struct ConversationReconstructor {
    messages: Vec<ConversationMessage>,
    usage: Option<Usage>,
    last_assistant_id: Option<String>,
}

impl ConversationReconstructor {
    /// Create an empty reconstructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay one transcript line
    ///
    /// Returns `false` when the line was skipped (malformed, meta or
    /// unrecognized).
    pub fn push_line(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                debug!("Skipping malformed transcript line: {}", e);
                return false;
            }
        };
        if value.get("isMeta").and_then(Value::as_bool).unwrap_or(false) {
            trace!("Skipping meta transcript line");
            return false;
        }

        let response = decode_value(&value);
        if matches!(response, Response::Unknown(_)) {
            debug!("Skipping unrecognized transcript line");
            return false;
        }

        if let Some(usage) = response.usage() {
            self.usage = Some(usage);
        }
        let message_id = response.message_id().map(str::to_string);

        // Fragments of one line always share a message, even without an id
        let mut opened_on_line = false;
        for fragment in response.into_fragments() {
            self.apply(fragment, message_id.as_deref(), &mut opened_on_line);
        }
        true
    }

    fn apply(&mut self, fragment: Response, message_id: Option<&str>, opened_on_line: &mut bool) {
        if is_transient(&fragment) {
            return;
        }

        if let Response::ToolResult(_) = fragment {
            match self.messages.last_mut() {
                Some(last) if last.role == Role::Assistant => last.responses.push(fragment),
                _ => debug!("Dropping orphaned tool result"),
            }
            return;
        }

        match fragment.role() {
            Role::Assistant => {
                let continues = *opened_on_line
                    || (message_id.is_some() && message_id == self.last_assistant_id.as_deref());
                match self.messages.last_mut() {
                    Some(last) if continues && last.role == Role::Assistant => {
                        last.responses.push(fragment);
                    }
                    _ => {
                        self.messages.push(ConversationMessage::new(
                            Role::Assistant,
                            fragment,
                            message_id.map(str::to_string),
                        ));
                        self.last_assistant_id = message_id.map(str::to_string);
                        *opened_on_line = true;
                    }
                }
            }
            role => {
                self.last_assistant_id = None;
                *opened_on_line = false;
                self.messages
                    .push(ConversationMessage::new(role, fragment, None));
            }
        }
    }

    /// Messages replayed so far
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Latest usage snapshot
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Identifier of the assistant message currently open for merging
    pub fn last_assistant_id(&self) -> Option<&str> {
        self.last_assistant_id.as_deref()
    }

    /// Finish replay
    pub fn finish(self) -> Conversation {
        Conversation {
            messages: self.messages,
            usage: self.usage,
        }
    }
}

/// Replay a complete transcript
pub fn reconstruct<I, S>(lines: I) -> Conversation
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut reconstructor = ConversationReconstructor::new();
    for line in lines {
        reconstructor.push_line(line.as_ref());
    }
    reconstructor.finish()
}

fn is_transient(response: &Response) -> bool {
    matches!(
        response,
        Response::Status(_)
            | Response::Completion(_)
            | Response::Result(_)
            | Response::Unknown(_)
            | Response::ControlRequest(_)
            | Response::ControlResponse(_)
    )
}
