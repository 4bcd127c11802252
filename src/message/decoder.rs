//! Line decoder for agent output
//!
//! Decoding never fails: anything that is not a recognized JSON object comes
//! back as [`Response::Unknown`] carrying the original text.

use serde::Deserialize;
use serde_json::Value;

use super::response::{
    AssistantResponse, CompactBoundaryResponse, ErrorResponse, Response, ResultResponse, Role,
    StatusResponse, TextResponse, ThinkingResponse, ToolResultResponse, ToolUseResponse,
    UnknownResponse, Usage, UserResponse,
};
use crate::control::protocol::{decode_control_request, decode_control_response};

/// Content block as it appears inside message envelopes and as a bare line
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

impl WireBlock {
    fn into_response(self, role: Role) -> Option<Response> {
        match self {
            WireBlock::Text { text } => Some(Response::Text(TextResponse { text, role })),
            WireBlock::Thinking { thinking } => {
                Some(Response::Thinking(ThinkingResponse { thinking }))
            }
            WireBlock::ToolUse { id, name, input } => {
                Some(Response::ToolUse(ToolUseResponse { id, name, input }))
            }
            WireBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(Response::ToolResult(ToolResultResponse {
                tool_use_id,
                content,
                is_error: is_error.unwrap_or(false),
            })),
            WireBlock::Other => None,
        }
    }
}

#[derive(Deserialize)]
struct WireAssistant {
    message: WireAssistantMessage,
    #[serde(default)]
    parent_tool_use_id: Option<String>,
}

#[derive(Deserialize)]
struct WireAssistantMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Deserialize)]
struct WireUser {
    message: WireUserMessage,
    #[serde(default)]
    uuid: Option<String>,
}

#[derive(Deserialize)]
struct WireUserMessage {
    #[serde(default)]
    content: Value,
}

/// Decode one line of agent output
///
/// Surrounding whitespace is ignored. Malformed JSON, non-object values and
/// objects with an unrecognized shape all yield [`Response::Unknown`].
pub fn decode_line(line: &str) -> Response {
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(value) => classify(&value).unwrap_or_else(|| unknown(line)),
        Err(_) => unknown(line),
    }
}

/// Decode an already-parsed JSON value
pub fn decode_value(value: &Value) -> Response {
    classify(value).unwrap_or_else(|| unknown(&value.to_string()))
}

fn unknown(raw: &str) -> Response {
    Response::Unknown(UnknownResponse {
        raw: raw.to_string(),
    })
}

fn classify(value: &Value) -> Option<Response> {
    let kind = value.get("type")?.as_str()?;
    match kind {
        "text" | "thinking" | "tool_use" | "tool_result" => {
            let role = if kind == "tool_result" {
                Role::User
            } else {
                Role::Assistant
            };
            serde_json::from_value::<WireBlock>(value.clone())
                .ok()?
                .into_response(role)
        }
        "status" => Some(decode_status(value)),
        "system" => Some(decode_system(value)),
        "error" => Some(Response::Error(decode_error(value))),
        "result" => Some(Response::Result(decode_result(value))),
        "assistant" => decode_assistant(value).map(Response::Assistant),
        "user" => decode_user(value).map(Response::User),
        "control_request" => decode_control_request(value).map(Response::ControlRequest),
        "control_response" => decode_control_response(value).map(Response::ControlResponse),
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn decode_usage(value: Option<&Value>) -> Option<Usage> {
    value.and_then(|usage| serde_json::from_value(usage.clone()).ok())
}

fn decode_status(value: &Value) -> Response {
    let status = str_field(value, "status")
        .or_else(|| str_field(value, "message"))
        .unwrap_or_else(|| "status".to_string());
    Response::Status(StatusResponse {
        status,
        session_id: str_field(value, "session_id"),
        raw: value.clone(),
    })
}

fn decode_system(value: &Value) -> Response {
    let subtype = str_field(value, "subtype").unwrap_or_else(|| "system".to_string());
    if subtype == "compact_boundary" {
        let metadata = value.get("compact_metadata");
        return Response::CompactBoundary(CompactBoundaryResponse {
            trigger: metadata.and_then(|m| str_field(m, "trigger")),
            pre_tokens: metadata
                .and_then(|m| m.get("pre_tokens"))
                .and_then(Value::as_u64),
        });
    }
    Response::Status(StatusResponse {
        status: subtype,
        session_id: str_field(value, "session_id"),
        raw: value.clone(),
    })
}

fn decode_error(value: &Value) -> ErrorResponse {
    let message = str_field(value, "message");
    match value.get("error") {
        Some(Value::String(error)) => {
            ErrorResponse::new(error.clone(), message.unwrap_or_else(|| error.clone()))
        }
        Some(error @ Value::Object(_)) => ErrorResponse::new(
            str_field(error, "type").unwrap_or_else(|| "error".to_string()),
            str_field(error, "message")
                .or(message)
                .unwrap_or_else(|| error.to_string()),
        ),
        _ => ErrorResponse::new("error", message.unwrap_or_default()),
    }
}

fn decode_result(value: &Value) -> ResultResponse {
    ResultResponse {
        subtype: str_field(value, "subtype").unwrap_or_else(|| "success".to_string()),
        is_error: value
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        result: str_field(value, "result"),
        session_id: str_field(value, "session_id"),
        duration_ms: value.get("duration_ms").and_then(Value::as_u64),
        total_cost_usd: value.get("total_cost_usd").and_then(Value::as_f64),
        usage: decode_usage(value.get("usage")),
    }
}

fn decode_blocks(content: &Value, role: Role) -> Vec<Response> {
    match content {
        Value::String(text) if !text.is_empty() => vec![Response::Text(TextResponse {
            text: text.clone(),
            role,
        })],
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| serde_json::from_value::<WireBlock>(block.clone()).ok())
            .filter_map(|block| block.into_response(role))
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_assistant(value: &Value) -> Option<AssistantResponse> {
    let wire: WireAssistant = serde_json::from_value(value.clone()).ok()?;
    Some(AssistantResponse {
        message_id: wire.message.id,
        model: wire.message.model,
        content: decode_blocks(&wire.message.content, Role::Assistant),
        usage: decode_usage(wire.message.usage.as_ref()),
        parent_tool_use_id: wire.parent_tool_use_id,
    })
}

fn decode_user(value: &Value) -> Option<UserResponse> {
    let wire: WireUser = serde_json::from_value(value.clone()).ok()?;
    let mut content = Vec::new();
    let mut text = Vec::new();

    // Consecutive text blocks form one user fragment; tool results stay separate.
    for fragment in decode_blocks(&wire.message.content, Role::User) {
        match fragment {
            Response::Text(block) => text.push(block.text),
            other => {
                flush_text(&mut text, &mut content);
                content.push(other);
            }
        }
    }
    flush_text(&mut text, &mut content);

    Some(UserResponse {
        uuid: wire.uuid,
        content,
    })
}

fn flush_text(text: &mut Vec<String>, content: &mut Vec<Response>) {
    if text.is_empty() {
        return;
    }
    content.push(Response::Text(TextResponse {
        text: text.join("\n"),
        role: Role::User,
    }));
    text.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlRequestKind, ControlResponseEnvelope};
    use serde_json::json;

    #[test]
    fn test_decode_malformed_line() {
        match decode_line("{not json") {
            Response::Unknown(unknown) => assert_eq!(unknown.raw, "{not json"),
            other => panic!("Expected unknown, got {other:?}"),
        }
        assert!(matches!(decode_line(""), Response::Unknown(_)));
        assert!(matches!(decode_line("[1, 2]"), Response::Unknown(_)));
        assert!(matches!(decode_line("\"text\""), Response::Unknown(_)));
    }

    #[test]
    fn test_decode_unrecognized_shape() {
        assert!(matches!(
            decode_line(r#"{"type":"mystery","x":1}"#),
            Response::Unknown(_)
        ));
        assert!(matches!(decode_line(r#"{"no_type":true}"#), Response::Unknown(_)));
        // Recognized type, but required fields are missing
        assert!(matches!(
            decode_line(r#"{"type":"tool_use","id":"t1"}"#),
            Response::Unknown(_)
        ));
    }

    #[test]
    fn test_decode_text_and_tool_use() {
        match decode_line(r#"{"type":"text","text":"hi"}"#) {
            Response::Text(text) => {
                assert_eq!(text.text, "hi");
                assert_eq!(text.role, Role::Assistant);
            }
            other => panic!("Expected text, got {other:?}"),
        }

        match decode_line(r#"{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"a"}}"#)
        {
            Response::ToolUse(tool) => {
                assert_eq!(tool.name, "Read");
                assert_eq!(tool.input, json!({"file_path": "a"}));
            }
            other => panic!("Expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_assistant_unwraps_tool_use() {
        let line = r#"{"type":"assistant","message":{"id":"m1","model":"sonnet","content":[{"type":"text","text":"Listing"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls -la"}}],"usage":{"input_tokens":10,"output_tokens":3,"cache_read_input_tokens":7,"cache_creation_input_tokens":2}}}"#;

        let response = decode_line(line);
        assert_eq!(response.message_id(), Some("m1"));
        assert_eq!(
            response.usage(),
            Some(Usage {
                input_tokens: 10,
                output_tokens: 3,
                cache_read_input_tokens: 7,
                cache_creation_input_tokens: 2,
            })
        );

        let fragments = response.into_fragments();
        assert_eq!(fragments.len(), 2);
        match &fragments[1] {
            Response::ToolUse(tool) => {
                assert_eq!(tool.id, "t1");
                assert_eq!(tool.name, "Bash");
                assert_eq!(tool.input, json!({"command": "ls -la"}));
            }
            other => panic!("Expected tool_use fragment, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_user_envelope() {
        let line = json!({
            "type": "user",
            "uuid": "u1",
            "message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "file.txt", "is_error": false}
            ]}
        });
        let fragments = decode_value(&line).into_fragments();
        assert_eq!(fragments.len(), 1);
        assert!(matches!(&fragments[0], Response::ToolResult(r) if r.tool_use_id == "t1"));

        let line = json!({"type": "user", "message": {"role": "user", "content": "hello"}});
        match decode_value(&line).into_fragments().as_slice() {
            [Response::Text(text)] => {
                assert_eq!(text.text, "hello");
                assert_eq!(text.role, Role::User);
            }
            other => panic!("Expected one user text, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_system_variants() {
        assert!(matches!(
            decode_line(r#"{"type":"system","subtype":"init","session_id":"s1"}"#),
            Response::Status(status) if status.status == "init" && status.session_id.as_deref() == Some("s1")
        ));
        match decode_line(
            r#"{"type":"system","subtype":"compact_boundary","compact_metadata":{"trigger":"auto","pre_tokens":1200}}"#,
        ) {
            Response::CompactBoundary(boundary) => {
                assert_eq!(boundary.trigger.as_deref(), Some("auto"));
                assert_eq!(boundary.pre_tokens, Some(1200));
            }
            other => panic!("Expected compact boundary, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_and_result() {
        match decode_line(r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#) {
            Response::Error(error) => {
                assert_eq!(error.error, "overloaded_error");
                assert_eq!(error.message, "busy");
            }
            other => panic!("Expected error, got {other:?}"),
        }

        match decode_line(r#"{"type":"result","subtype":"success","is_error":false,"result":"done","session_id":"s1"}"#) {
            Response::Result(result) => {
                assert_eq!(result.result.as_deref(), Some("done"));
                assert!(!result.is_error);
            }
            other => panic!("Expected result, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_control_envelopes() {
        let line = r#"{"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"Write","input":{"file_path":"x"}}}"#;
        match decode_line(line) {
            Response::ControlRequest(request) => {
                assert_eq!(request.request_id.as_str(), "r1");
                assert!(matches!(request.request, ControlRequestKind::CanUseTool { .. }));
            }
            other => panic!("Expected control request, got {other:?}"),
        }

        let line = r#"{"type":"control_response","response":{"subtype":"error","request_id":"req_1_ab","error":"nope"}}"#;
        match decode_line(line) {
            Response::ControlResponse(ControlResponseEnvelope::Error { request_id, message }) => {
                assert_eq!(request_id.as_str(), "req_1_ab");
                assert_eq!(message, "nope");
            }
            other => panic!("Expected control error response, got {other:?}"),
        }
    }
}
