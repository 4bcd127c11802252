//! Integration tests for transcript replay

use std::io::Write;

use agent_control::conversation::{reconstruct, ConversationReconstructor, TranscriptStore};
use agent_control::{Response, Role};
use serde_json::json;

fn session_lines() -> Vec<String> {
    vec![
        json!({"type": "system", "subtype": "init", "session_id": "s1"}),
        json!({"type": "user", "message": {"role": "user", "content": "Fix the failing test"}}),
        json!({"type": "assistant", "message": {"id": "msg_1", "model": "m",
            "content": [{"type": "thinking", "thinking": "Look at the test first"}],
            "usage": {"input_tokens": 100, "cache_read_input_tokens": 20}}}),
        json!({"type": "assistant", "message": {"id": "msg_1",
            "content": [{"type": "tool_use", "id": "toolu_1", "name": "Read",
                "input": {"file_path": "/src/lib.rs"}}],
            "usage": {"input_tokens": 120, "cache_read_input_tokens": 20}}}),
        json!({"type": "user", "message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "fn main() {}"}
        ]}}),
        json!({"type": "user", "isMeta": true, "message": {"content": "<local-command-caveat>"}}),
        json!({"type": "assistant", "message": {"id": "msg_2",
            "content": [{"type": "text", "text": "The test is fixed."}],
            "usage": {"input_tokens": 150, "cache_creation_input_tokens": 7}}}),
        json!({"type": "result", "subtype": "success", "is_error": false, "result": "done"}),
    ]
    .into_iter()
    .map(|value| value.to_string())
    .collect()
}

#[test]
fn test_full_session_replay() {
    let conversation = reconstruct(session_lines());
    let messages = &conversation.messages;

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text(), "Fix the failing test");

    // Thinking, tool use and the folded tool result share one message
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].message_id.as_deref(), Some("msg_1"));
    assert!(matches!(messages[1].responses[0], Response::Thinking(_)));
    assert!(matches!(&messages[1].responses[1], Response::ToolUse(t) if t.name == "Read"));
    assert!(matches!(&messages[1].responses[2], Response::ToolResult(r) if r.tool_use_id == "toolu_1"));

    assert_eq!(messages[2].text(), "The test is fixed.");
    assert!(messages.iter().all(|m| m.is_complete && !m.is_streaming));

    let usage = conversation.usage.unwrap();
    assert_eq!(usage.input_tokens, 150);
    assert_eq!(usage.cache_read_input_tokens, 0);
    assert_eq!(usage.cache_creation_input_tokens, 7);
}

#[test]
fn test_replay_is_deterministic() {
    assert_eq!(reconstruct(session_lines()), reconstruct(session_lines()));
}

#[test]
fn test_incremental_matches_one_shot() {
    let mut reconstructor = ConversationReconstructor::new();
    for line in session_lines() {
        reconstructor.push_line(&line);
    }
    assert_eq!(reconstructor.finish(), reconstruct(session_lines()));
}

#[test]
fn test_malformed_lines_only_lose_themselves() {
    let mut lines = session_lines();
    lines.insert(2, "{\"type\": \"assistant\", \"message\": ".to_string());
    lines.insert(0, "garbage".to_string());

    let conversation = reconstruct(lines);
    assert_eq!(conversation.messages.len(), 3);
}

#[test]
fn test_error_lines_are_standalone_messages() {
    let conversation = reconstruct([
        json!({"type": "assistant", "message": {"id": "m1", "content": [{"type": "text", "text": "a"}]}})
            .to_string(),
        json!({"type": "error", "error": "overloaded_error", "message": "Overloaded"}).to_string(),
        json!({"type": "assistant", "message": {"id": "m1", "content": [{"type": "text", "text": "b"}]}})
            .to_string(),
    ]);

    let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Assistant, Role::Other, Role::Assistant]);
}

#[tokio::test]
async fn test_transcript_store_round_trip() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let project = TranscriptStore::project_dir_name(std::path::Path::new("/work/app"));
    let store = TranscriptStore::new(root.path());
    std::fs::create_dir_all(root.path().join(&project))?;

    let mut file = std::fs::File::create(store.session_path(&project, "session-a"))?;
    for line in session_lines() {
        writeln!(file, "{line}")?;
    }
    writeln!(file)?;
    drop(file);
    std::fs::write(root.path().join(&project).join("notes.txt"), "ignored")?;

    let sessions = store.list_sessions(&project).await?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, "session-a");
    assert!(sessions[0].size > 0);

    let lines = store.read_lines(&project, "session-a").await?;
    assert_eq!(lines.len(), session_lines().len());

    let conversation = store.load_conversation(&project, "session-a").await?;
    assert_eq!(conversation, reconstruct(session_lines()));
    Ok(())
}
