//! Integration tests for stream framing and fan-out

use agent_control::transport::{Broadcaster, LineFramer, StreamReader, DEFAULT_MAX_LINE_LENGTH};
use agent_control::Response;
use futures::StreamExt;

const OUTPUT: &[u8] = b"{\"type\":\"status\",\"status\":\"thinking\"}\n\
{\"type\":\"assistant\",\"message\":{\"id\":\"m1\",\"content\":[{\"type\":\"text\",\"text\":\"h\xc3\xa9llo\"}]}}\n\
\n\
{\"type\":\"control_request\",\"request_id\":\"r1\",\"request\":{\"subtype\":\"can_use_tool\",\"tool_name\":\"Bash\",\"input\":{}}}\n\
{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false}\n";

fn frame_in_chunks(chunk_size: usize) -> Vec<Response> {
    let mut framer = LineFramer::default();
    let mut responses = Vec::new();
    for chunk in OUTPUT.chunks(chunk_size) {
        responses.extend(framer.push(chunk));
    }
    responses.extend(framer.finish());
    responses
}

#[test]
fn test_chunk_boundaries_do_not_change_output() {
    let whole = frame_in_chunks(OUTPUT.len());
    assert_eq!(whole.len(), 4);
    assert!(whole.iter().all(|r| !matches!(r, Response::Unknown(_))));

    // Includes splits inside the multi-byte character
    for chunk_size in 1..OUTPUT.len() {
        assert_eq!(frame_in_chunks(chunk_size), whole, "chunk size {chunk_size}");
    }
}

#[tokio::test]
async fn test_chunked_reader_with_mock_io() {
    let stdout = tokio_test::io::Builder::new()
        .read(b"{\"type\":\"text\",")
        .read(b"\"text\":\"split\"}\n{\"type\":")
        .read(b"\"text\",\"text\":\"tail\"}")
        .build();
    let hub = Broadcaster::new();
    let subscription = hub.subscribe();

    StreamReader::spawn(stdout, None::<&[u8]>, hub, DEFAULT_MAX_LINE_LENGTH)
        .wait()
        .await;

    let texts: Vec<String> = subscription
        .into_stream()
        .filter_map(|event| async move {
            match event {
                Response::Text(text) => Some(text.text),
                _ => None,
            }
        })
        .collect()
        .await;
    assert_eq!(texts, vec!["split", "tail"]);
}

#[tokio::test]
async fn test_every_subscriber_sees_every_event_in_order() {
    let hub = Broadcaster::new();
    let first = hub.subscribe();
    let second = hub.subscribe();

    StreamReader::spawn(OUTPUT, None::<&[u8]>, hub, DEFAULT_MAX_LINE_LENGTH)
        .wait()
        .await;

    let first: Vec<Response> = first.into_stream().collect().await;
    let second: Vec<Response> = second.into_stream().collect().await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
    assert!(matches!(first.last(), Some(Response::Completion(_))));
}

#[tokio::test]
async fn test_pre_split_lines() {
    let lines = futures::stream::iter(vec![
        Ok("{\"type\":\"text\",\"text\":\"one\"}".to_string()),
        Ok("   ".to_string()),
        Ok("not json".to_string()),
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed")),
        Ok("{\"type\":\"text\",\"text\":\"never read\"}".to_string()),
    ]);
    let hub = Broadcaster::new();
    let subscription = hub.subscribe();

    StreamReader::spawn_lines(lines, hub).wait().await;

    let events: Vec<Response> = subscription.into_stream().collect().await;
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], Response::Text(t) if t.text == "one"));
    assert!(matches!(&events[1], Response::Unknown(u) if u.raw == "not json"));
    assert!(matches!(&events[2], Response::Error(e) if e.error == "Stream Error"));
    assert!(matches!(&events[3], Response::Completion(c) if c.stop_reason == "process_ended"));
}
