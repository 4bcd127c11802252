//! Integration tests for interactive permission arbitration

use std::sync::Arc;
use std::time::Duration;

use agent_control::permissions::{
    AgentIdentity, ArbitratorConfig, AtomicSequence, ChannelEventSink, PermissionArbitrator,
    PermissionEvent, PermissionResponse,
};
use agent_control::types::PermissionResult;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

fn arbitrator(
    config: ArbitratorConfig,
) -> (Arc<PermissionArbitrator>, UnboundedReceiver<PermissionEvent>) {
    let (sink, events) = ChannelEventSink::new();
    let arbitrator = PermissionArbitrator::new(
        config,
        Arc::new(sink),
        Arc::new(AtomicSequence::starting_at(10)),
    );
    (Arc::new(arbitrator), events)
}

fn agent() -> AgentIdentity {
    AgentIdentity::new("agent-1", "subagent")
        .with_name("reviewer")
        .with_task("check the diff")
}

fn deny_message(result: PermissionResult) -> String {
    match result {
        PermissionResult::Deny(deny) => deny.message,
        PermissionResult::Allow(_) => panic!("Expected deny"),
    }
}

/// Start a request in the background and wait for its published event
async fn ask(
    arbitrator: &Arc<PermissionArbitrator>,
    events: &mut UnboundedReceiver<PermissionEvent>,
    tool_name: &'static str,
) -> (tokio::task::JoinHandle<PermissionResult>, String) {
    let task = {
        let arbitrator = Arc::clone(arbitrator);
        tokio::spawn(async move {
            arbitrator
                .resolve_ask_user(tool_name, json!({"command": "cargo build"}), Vec::new(), &agent())
                .await
        })
    };
    let event = events.recv().await.expect("permission request event");
    let request_id = event.request_id().to_string();
    (task, request_id)
}

#[tokio::test(start_paused = true)]
async fn test_timeout_denies_and_emits_timeout_event() {
    let (arbitrator, mut events) =
        arbitrator(ArbitratorConfig::default().with_timeout(Duration::from_secs(30)));

    let result = arbitrator
        .resolve_ask_user(
            "Bash",
            json!({"command": "rm -rf target"}),
            vec!["Bash(rm:*)".to_string()],
            &agent(),
        )
        .await;
    assert_eq!(
        deny_message(result),
        "Permission request timed out after 30 seconds"
    );
    assert_eq!(arbitrator.pending_count(), 0);

    let request = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(request["type"], "permission-request");
    assert_eq!(request["seq"], 10);
    assert_eq!(request["agentId"], "agent-1");
    assert_eq!(request["agentType"], "subagent");
    assert_eq!(request["agentName"], "reviewer");
    assert_eq!(request["taskName"], "check the diff");
    assert_eq!(request["tool"]["name"], "Bash");
    assert_eq!(request["tool"]["permission-suggestions"], json!(["Bash(rm:*)"]));

    let timeout = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(timeout["type"], "permission-timeout");
    assert_eq!(timeout["seq"], 11);
    assert_eq!(timeout["requestId"], request["requestId"]);
    assert!(timeout.get("tool").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_response_resolves_once() {
    let (arbitrator, mut events) = arbitrator(ArbitratorConfig::default());
    let (task, request_id) = ask(&arbitrator, &mut events, "Bash").await;

    let pending = arbitrator.pending_requests();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id, request_id);
    assert_eq!(pending[0].tool_name, "Bash");

    assert!(arbitrator.respond(PermissionResponse::deny(request_id.clone(), "nope")));
    assert!(!arbitrator.respond(PermissionResponse::allow(request_id)));
    assert_eq!(deny_message(task.await.unwrap()), "nope");

    // The timer was cancelled; no timeout event follows
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_external_response_wire_format() {
    let (arbitrator, mut events) = arbitrator(ArbitratorConfig::default());

    let (task, request_id) = ask(&arbitrator, &mut events, "Write").await;
    let response: PermissionResponse =
        serde_json::from_value(json!({"requestId": request_id, "allow": true})).unwrap();
    assert!(arbitrator.respond(response));
    assert!(task.await.unwrap().is_allow());

    let (task, request_id) = ask(&arbitrator, &mut events, "Write").await;
    let response: PermissionResponse =
        serde_json::from_value(json!({"requestId": request_id, "allow": false})).unwrap();
    assert!(arbitrator.respond(response));
    assert_eq!(deny_message(task.await.unwrap()), "User denied permission");
}

#[tokio::test(start_paused = true)]
async fn test_response_after_timeout_is_ignored() {
    let (arbitrator, mut events) =
        arbitrator(ArbitratorConfig::default().with_timeout(Duration::from_secs(5)));
    let (task, request_id) = ask(&arbitrator, &mut events, "Bash").await;

    let result = task.await.unwrap();
    assert!(deny_message(result).contains("5 seconds"));
    assert!(!arbitrator.respond(PermissionResponse::allow(request_id)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_denies_everything() {
    let (arbitrator, mut events) = arbitrator(ArbitratorConfig::default());
    let (first, _) = ask(&arbitrator, &mut events, "Bash").await;
    let (second, _) = ask(&arbitrator, &mut events, "Edit").await;
    assert_eq!(arbitrator.pending_count(), 2);

    assert_eq!(arbitrator.cancel_all(), 2);
    assert_eq!(deny_message(first.await.unwrap()), "Session ended");
    assert_eq!(deny_message(second.await.unwrap()), "Session ended");
    assert_eq!(arbitrator.pending_count(), 0);
    assert_eq!(arbitrator.cancel_all(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_resolutions_settle_each_request_once() {
    const TIMED_OUT: &str = "Permission request timed out after 30 seconds";
    let (arbitrator, mut events) =
        arbitrator(ArbitratorConfig::default().with_timeout(Duration::from_secs(30)));
    let (answered, answered_id) = ask(&arbitrator, &mut events, "Bash").await;
    let (cancelled, cancelled_id) = ask(&arbitrator, &mut events, "Edit").await;

    // Both timers are due now, racing the response and the cancellation
    tokio::time::sleep(Duration::from_secs(30)).await;
    let responded = arbitrator.respond(PermissionResponse::allow(answered_id.clone()));
    let cancelled_count = arbitrator.cancel_all();
    assert!(!arbitrator.respond(PermissionResponse::allow(cancelled_id.clone())));

    let answered = answered.await.unwrap();
    let cancelled = cancelled.await.unwrap();
    let mut timed_out = Vec::new();

    if responded {
        assert!(answered.is_allow());
    } else {
        assert_eq!(deny_message(answered), TIMED_OUT);
        timed_out.push(answered_id.clone());
    }
    match deny_message(cancelled).as_str() {
        "Session ended" => assert_eq!(cancelled_count, 1),
        TIMED_OUT => {
            assert_eq!(cancelled_count, 0);
            timed_out.push(cancelled_id.clone());
        }
        other => panic!("Unexpected deny message: {other}"),
    }
    assert_eq!(arbitrator.pending_count(), 0);

    // Timeout events exist only for requests the timer actually settled
    tokio::time::sleep(Duration::from_secs(60)).await;
    let mut timeout_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert!(matches!(event, PermissionEvent::PermissionTimeout { .. }));
        timeout_events.push(event.request_id().to_string());
    }
    timeout_events.sort();
    timed_out.sort();
    assert_eq!(timeout_events, timed_out);
}

#[tokio::test(start_paused = true)]
async fn test_sub_second_timeout_message() {
    let (arbitrator, _events) =
        arbitrator(ArbitratorConfig::default().with_timeout(Duration::from_millis(500)));

    let result = arbitrator
        .resolve_ask_user("Bash", json!({}), Vec::new(), &agent())
        .await;
    assert_eq!(
        deny_message(result),
        "Permission request timed out after 0.5 seconds"
    );
}
