//! Control protocol wire types and request correlation
//!
//! Every control message is one JSON object per line:
//!
//! ```text
//! agent -> engine  {"type":"control_request","request_id":"<id>","request":{"subtype":"can_use_tool", ...}}
//! engine -> agent  {"type":"control_response","response":{"subtype":"success","request_id":"<id>","response":{...}}}
//! engine -> agent  {"type":"control_request","request_id":"req_1_0a1b2c3d","request":{"subtype":"interrupt"}}
//! engine -> agent  {"type":"control_request","request_id":"req_2_4e5f6a7b","request":{"subtype":"rewind_files","user_message_id":"msg_42"}}
//! ```
//!
//! Outgoing commands carry their fields next to `subtype` inside `request`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::error::{AgentError, Result};
use crate::types::{
    CallbackId, PermissionMode, PermissionResult, PermissionUpdate, RequestId, ToolName,
    ToolPermissionContext,
};

/// Incoming control request subtypes the engine understands
pub const KNOWN_REQUEST_SUBTYPES: &[&str] = &["can_use_tool", "hook_callback", "mcp_message"];

/// Control request sent by the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncomingControlRequest {
    /// Request ID to echo in the response
    pub request_id: RequestId,
    /// Request body
    pub request: ControlRequestKind,
}

/// Body of an incoming control request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequestKind {
    /// Ask whether a tool may run
    CanUseTool {
        /// Tool the agent wants to run
        tool_name: ToolName,
        /// Raw tool input
        input: Value,
        /// Suggestions and extra details
        context: ToolPermissionContext,
    },
    /// Invoke a registered hook callback
    HookCallback {
        /// Callback registered during initialize
        callback_id: CallbackId,
        /// Tool use the hook fires for
        tool_use_id: Option<String>,
        /// Hook-specific input payload
        input: Value,
    },
    /// JSON-RPC message for an in-process MCP server
    McpMessage {
        /// Target server name
        server_name: String,
        /// JSON-RPC payload
        message: Value,
    },
    /// Subtype the engine does not understand, or a malformed known one
    Unknown {
        /// Subtype as sent
        kind: String,
        /// Request body as sent
        raw: Value,
    },
}

/// Control response received for one of our outgoing requests
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponseEnvelope {
    /// Request succeeded
    Success {
        /// Request being answered
        request_id: RequestId,
        /// Response payload
        payload: Value,
    },
    /// Request failed
    Error {
        /// Request being answered
        request_id: RequestId,
        /// Error description
        message: String,
    },
}

impl ControlResponseEnvelope {
    /// Request this response answers
    pub fn request_id(&self) -> &RequestId {
        match self {
            ControlResponseEnvelope::Success { request_id, .. }
            | ControlResponseEnvelope::Error { request_id, .. } => request_id,
        }
    }
}

/// Command sent from the engine to the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Handshake carrying the hook table
    Initialize {
        /// Hook table keyed by event name
        #[serde(skip_serializing_if = "Option::is_none")]
        hooks: Option<Value>,
    },
    /// Interrupt the current turn
    Interrupt,
    /// Change the permission mode
    SetPermissionMode {
        /// New mode
        mode: PermissionMode,
    },
    /// Switch model (`None` restores the default)
    SetModel {
        /// Model name
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// Restore files to their state at a prior user message
    RewindFiles {
        /// User message to rewind to
        user_message_id: String,
    },
}

impl ControlCommand {
    /// Wire subtype of the command
    pub fn subtype(&self) -> &'static str {
        match self {
            ControlCommand::Initialize { .. } => "initialize",
            ControlCommand::Interrupt => "interrupt",
            ControlCommand::SetPermissionMode { .. } => "set_permission_mode",
            ControlCommand::SetModel { .. } => "set_model",
            ControlCommand::RewindFiles { .. } => "rewind_files",
        }
    }
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    request_id: &'a RequestId,
    request: &'a ControlCommand,
}

/// Serialize an outgoing control command
pub fn command_message(request_id: &RequestId, command: &ControlCommand) -> Result<Value> {
    Ok(serde_json::to_value(OutgoingEnvelope {
        kind: "control_request",
        request_id,
        request: command,
    })?)
}

/// Successful answer to an incoming control request
pub fn success_response(request_id: &RequestId, payload: Value) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": payload,
        }
    })
}

/// Failed answer to an incoming control request
pub fn error_response(request_id: &RequestId, message: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": message,
        }
    })
}

/// Translate a permission decision into the `can_use_tool` response payload
///
/// Allow responses always carry `updatedInput`, falling back to the input the
/// agent sent.
pub fn permission_payload(result: PermissionResult, original_input: &Value) -> Value {
    match result {
        PermissionResult::Allow(allow) => {
            let mut payload = json!({
                "behavior": "allow",
                "updatedInput": allow.updated_input.unwrap_or_else(|| original_input.clone()),
            });
            if let Some(updates) = allow.updated_permissions {
                payload["updatedPermissions"] = json!(updates);
            }
            payload
        }
        PermissionResult::Deny(deny) => json!({
            "behavior": "deny",
            "message": deny.message,
            "interrupt": deny.interrupt,
        }),
    }
}

#[derive(Deserialize)]
struct WireCanUseTool {
    tool_name: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    permission_suggestions: Option<Vec<Value>>,
    #[serde(default)]
    blocked_path: Option<String>,
    #[serde(default)]
    tool_use_id: Option<String>,
}

#[derive(Deserialize)]
struct WireHookCallback {
    callback_id: String,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    input: Value,
}

#[derive(Deserialize)]
struct WireMcpMessage {
    server_name: String,
    message: Value,
}

/// Decode a `control_request` line
pub fn decode_control_request(value: &Value) -> Option<IncomingControlRequest> {
    let request_id = RequestId::new(value.get("request_id")?.as_str()?);
    let body = value.get("request")?;
    let subtype = body.get("subtype")?.as_str()?;

    let request = match subtype {
        "can_use_tool" => serde_json::from_value::<WireCanUseTool>(body.clone())
            .ok()
            .map(|wire| ControlRequestKind::CanUseTool {
                tool_name: ToolName::new(wire.tool_name),
                input: wire.input,
                context: ToolPermissionContext {
                    // Suggestion shapes vary between agent versions; keep the ones we know.
                    suggestions: wire
                        .permission_suggestions
                        .into_iter()
                        .flatten()
                        .filter_map(|s| serde_json::from_value::<PermissionUpdate>(s).ok())
                        .collect(),
                    blocked_path: wire.blocked_path,
                    tool_use_id: wire.tool_use_id,
                },
            }),
        "hook_callback" => serde_json::from_value::<WireHookCallback>(body.clone())
            .ok()
            .map(|wire| ControlRequestKind::HookCallback {
                callback_id: CallbackId::new(wire.callback_id),
                tool_use_id: wire.tool_use_id,
                input: wire.input,
            }),
        "mcp_message" => serde_json::from_value::<WireMcpMessage>(body.clone())
            .ok()
            .map(|wire| ControlRequestKind::McpMessage {
                server_name: wire.server_name,
                message: wire.message,
            }),
        _ => None,
    }
    .unwrap_or_else(|| ControlRequestKind::Unknown {
        kind: subtype.to_string(),
        raw: body.clone(),
    });

    Some(IncomingControlRequest {
        request_id,
        request,
    })
}

/// Decode a `control_response` line
pub fn decode_control_response(value: &Value) -> Option<ControlResponseEnvelope> {
    let body = value.get("response")?;
    let request_id = RequestId::new(body.get("request_id")?.as_str()?);
    match body.get("subtype")?.as_str()? {
        "success" => Some(ControlResponseEnvelope::Success {
            request_id,
            payload: body.get("response").cloned().unwrap_or_else(|| json!({})),
        }),
        "error" => Some(ControlResponseEnvelope::Error {
            request_id,
            message: body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string(),
        }),
        _ => None,
    }
}

/// Generator for outgoing request IDs (`req_<counter>_<random>`)
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a new generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Next request ID; never repeats within one generator
    pub fn next_id(&self) -> RequestId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let random = uuid::Uuid::new_v4().simple().to_string();
        RequestId::new(format!("req_{n}_{}", &random[..8]))
    }
}

type Slot = oneshot::Sender<Result<Value>>;

/// Table of outgoing requests awaiting a control response
///
/// Each slot resolves at most once. After [`PendingRequests::close`] the table
/// rejects new registrations.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<PendingState>,
}

#[derive(Debug, Default)]
struct PendingState {
    slots: HashMap<RequestId, Slot>,
    closed: bool,
}

impl PendingRequests {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a completion slot for a request
    pub fn register(&self, request_id: RequestId) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut state = self.lock();
        if state.closed {
            return Err(AgentError::EngineClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.slots.insert(request_id, tx);
        Ok(rx)
    }

    /// Resolve a slot from a control response
    ///
    /// Returns `false` when no slot is waiting for the response's request ID.
    pub fn complete(&self, response: ControlResponseEnvelope) -> bool {
        let slot = self.lock().slots.remove(response.request_id());
        let Some(slot) = slot else {
            return false;
        };
        let outcome = match response {
            ControlResponseEnvelope::Success { payload, .. } => Ok(payload),
            ControlResponseEnvelope::Error {
                request_id,
                message,
            } => Err(AgentError::control_request_failed(request_id.as_str(), message)),
        };
        // The caller may have stopped waiting; that is not an error here.
        let _ = slot.send(outcome);
        true
    }

    /// Drop a slot without resolving it (used when the write fails)
    pub fn forget(&self, request_id: &RequestId) {
        self.lock().slots.remove(request_id);
    }

    /// Fail every outstanding slot and reject future registrations
    pub fn close(&self, error: impl Fn() -> AgentError) -> usize {
        let slots: Vec<Slot> = {
            let mut state = self.lock();
            state.closed = true;
            state.slots.drain().map(|(_, slot)| slot).collect()
        };
        let count = slots.len();
        for slot in slots {
            let _ = slot.send(Err(error()));
        }
        count
    }

    /// Number of outstanding slots
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Whether no request is outstanding
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PermissionResultDeny;

    #[test]
    fn test_request_id_generation() {
        let ids = RequestIdGenerator::new();
        let id1 = ids.next_id();
        let id2 = ids.next_id();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("req_1_"));
        assert!(id2.as_str().starts_with("req_2_"));
        assert_eq!(id1.as_str().len(), "req_1_".len() + 8);
    }

    #[test]
    fn test_command_serialization() {
        let id = RequestId::new("req_1_abcd1234");
        let message = command_message(&id, &ControlCommand::Interrupt).unwrap();
        assert_eq!(
            message,
            json!({
                "type": "control_request",
                "request_id": "req_1_abcd1234",
                "request": {"subtype": "interrupt"}
            })
        );

        let message = command_message(
            &id,
            &ControlCommand::SetPermissionMode {
                mode: PermissionMode::AcceptEdits,
            },
        )
        .unwrap();
        assert_eq!(message["request"]["mode"], "acceptEdits");

        let message = command_message(
            &id,
            &ControlCommand::RewindFiles {
                user_message_id: "u42".to_string(),
            },
        )
        .unwrap();
        assert_eq!(message["request"]["subtype"], "rewind_files");
        assert_eq!(message["request"]["user_message_id"], "u42");
    }

    #[test]
    fn test_permission_payload_defaults_updated_input() {
        let input = json!({"file_path": "/tmp/a"});
        let payload = permission_payload(PermissionResult::allow(), &input);
        assert_eq!(
            payload,
            json!({"behavior": "allow", "updatedInput": input.clone()})
        );

        let payload = permission_payload(
            PermissionResult::Deny(PermissionResultDeny {
                message: "no".to_string(),
                interrupt: true,
            }),
            &input,
        );
        assert_eq!(
            payload,
            json!({"behavior": "deny", "message": "no", "interrupt": true})
        );
    }

    #[test]
    fn test_decode_malformed_known_subtype() {
        let value = json!({
            "type": "control_request",
            "request_id": "r9",
            "request": {"subtype": "can_use_tool"}
        });
        let request = decode_control_request(&value).unwrap();
        match request.request {
            ControlRequestKind::Unknown { kind, .. } => assert_eq!(kind, "can_use_tool"),
            other => panic!("Expected unknown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pending_request_resolution() {
        let pending = PendingRequests::new();
        let rx = pending.register(RequestId::new("req_1")).unwrap();

        assert!(pending.complete(ControlResponseEnvelope::Success {
            request_id: RequestId::new("req_1"),
            payload: json!({"ok": true}),
        }));
        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));

        // Second response for the same id finds no slot
        assert!(!pending.complete(ControlResponseEnvelope::Success {
            request_id: RequestId::new("req_1"),
            payload: json!({}),
        }));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_pending_request_error_and_stale() {
        let pending = PendingRequests::new();
        let rx = pending.register(RequestId::new("req_2")).unwrap();

        assert!(!pending.complete(ControlResponseEnvelope::Error {
            request_id: RequestId::new("stale"),
            message: "late".to_string(),
        }));
        assert_eq!(pending.len(), 1);

        pending.complete(ControlResponseEnvelope::Error {
            request_id: RequestId::new("req_2"),
            message: "bad mode".to_string(),
        });
        match rx.await.unwrap() {
            Err(AgentError::ControlRequestFailed { message, .. }) => assert_eq!(message, "bad mode"),
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pending_close_fails_outstanding() {
        let pending = PendingRequests::new();
        let rx1 = pending.register(RequestId::new("a")).unwrap();
        let rx2 = pending.register(RequestId::new("b")).unwrap();

        assert_eq!(pending.close(|| AgentError::EngineClosed), 2);
        assert!(matches!(rx1.await.unwrap(), Err(AgentError::EngineClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(AgentError::EngineClosed)));
        assert!(matches!(
            pending.register(RequestId::new("c")),
            Err(AgentError::EngineClosed)
        ));
    }
}
