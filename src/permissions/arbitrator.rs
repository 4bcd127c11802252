//! Interactive permission arbitration
//!
//! When the rule evaluator answers "ask the user", the arbitrator publishes a
//! `permission-request` event through an [`EventSink`] and suspends until an
//! external [`PermissionResponse`] arrives or the configured timeout fires.
//! Every pending request is resolved exactly once: the first of response,
//! timeout or [`PermissionArbitrator::cancel_all`] wins and removes the entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::types::PermissionResult;

/// Default time to wait for an external decision
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Deny message when the responder gives none
pub const DEFAULT_DENY_MESSAGE: &str = "User denied permission";

/// Deny message for requests cancelled by [`PermissionArbitrator::cancel_all`]
pub const SESSION_ENDED_MESSAGE: &str = "Session ended";

/// Arbitration settings, passed explicitly to the arbitrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArbitratorConfig {
    /// Allow every ask-user decision without an external round trip
    pub auto_approve: bool,
    /// How long a request may stay pending
    #[serde(rename = "timeoutSecs", with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            timeout: DEFAULT_PERMISSION_TIMEOUT,
        }
    }
}

impl ArbitratorConfig {
    /// Load from a JSON file such as `{"autoApprove": false, "timeoutSecs": 120}`
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::invalid_config(format!("Cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AgentError::invalid_config(format!("Invalid arbitrator config {}: {e}", path.display()))
        })
    }

    /// Set the pending-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable auto-approval
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Identity of the agent asking for permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    /// Agent instance id
    pub agent_id: String,
    /// Agent kind, e.g. `"main"` or `"subagent"`
    pub agent_type: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Task the agent is working on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
}

impl AgentIdentity {
    /// Identity with only the required fields
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            agent_name: None,
            task_name: None,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Set the task name
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task_name = Some(task.into());
        self
    }
}

/// Tool payload of a permission request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionToolInfo {
    /// Tool name
    pub name: String,
    /// Raw tool input
    pub input: Value,
    /// Suggested permission patterns
    #[serde(rename = "permission-suggestions", skip_serializing_if = "Vec::is_empty")]
    pub permission_suggestions: Vec<String>,
}

/// Event published to the external party
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PermissionEvent {
    /// A decision is needed
    PermissionRequest {
        /// Sequence number from the session's [`SequenceSource`]
        seq: u64,
        /// Requesting agent
        #[serde(flatten)]
        agent: AgentIdentity,
        /// Id to answer with
        #[serde(rename = "requestId")]
        request_id: String,
        /// Tool awaiting the decision
        tool: PermissionToolInfo,
    },
    /// The request expired and was denied
    PermissionTimeout {
        /// Sequence number from the session's [`SequenceSource`]
        seq: u64,
        /// Requesting agent
        #[serde(flatten)]
        agent: AgentIdentity,
        /// Expired request
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

impl PermissionEvent {
    /// Request id the event refers to
    pub fn request_id(&self) -> &str {
        match self {
            PermissionEvent::PermissionRequest { request_id, .. }
            | PermissionEvent::PermissionTimeout { request_id, .. } => request_id,
        }
    }
}

/// External decision for a pending request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    /// Request being answered
    pub request_id: String,
    /// Whether the tool use is allowed
    pub allow: bool,
    /// Optional deny reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PermissionResponse {
    /// Allow `request_id`
    pub fn allow(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            allow: true,
            message: None,
        }
    }

    /// Deny `request_id` with a reason
    pub fn deny(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            allow: false,
            message: Some(message.into()),
        }
    }
}

/// Delivers permission events to a remote party
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event
    ///
    /// # Errors
    /// Returns error if the event cannot be delivered
    async fn emit(&self, event: PermissionEvent) -> Result<()>;
}

/// Monotonic per-session sequence numbers
pub trait SequenceSource: Send + Sync {
    /// Next sequence number
    fn next_seq(&self) -> u64;
}

/// [`SequenceSource`] backed by an atomic counter
#[derive(Debug, Default)]
pub struct AtomicSequence {
    next: AtomicU64,
}

impl AtomicSequence {
    /// Counter starting at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter starting at `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl SequenceSource for AtomicSequence {
    fn next_seq(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// [`EventSink`] forwarding into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<PermissionEvent>,
}

impl ChannelEventSink {
    /// Create the sink and the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PermissionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: PermissionEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| AgentError::permission("Permission event receiver dropped"))
    }
}

/// Snapshot of a pending request
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPermissionInfo {
    /// Request id
    pub request_id: String,
    /// Tool awaiting a decision
    pub tool_name: String,
    /// Raw tool input
    pub tool_input: Value,
    /// Requesting agent
    pub agent: AgentIdentity,
    /// When the request was created
    pub created_at: DateTime<Utc>,
}

struct PendingPermission {
    info: PendingPermissionInfo,
    timer: Option<AbortHandle>,
    resolver: oneshot::Sender<PermissionResult>,
}

impl PendingPermission {
    fn resolve(self, result: PermissionResult) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The waiter may already be gone if its future was dropped
        let _ = self.resolver.send(result);
    }
}

type PendingTable = Arc<Mutex<HashMap<String, PendingPermission>>>;

fn lock(table: &PendingTable) -> MutexGuard<'_, HashMap<String, PendingPermission>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turns ask-user verdicts into time-bounded external decisions
///
/// One arbitrator serves one agent session.
pub struct PermissionArbitrator {
    config: ArbitratorConfig,
    sink: Arc<dyn EventSink>,
    sequence: Arc<dyn SequenceSource>,
    pending: PendingTable,
}

impl PermissionArbitrator {
    /// Create an arbitrator with its collaborators
    pub fn new(
        config: ArbitratorConfig,
        sink: Arc<dyn EventSink>,
        sequence: Arc<dyn SequenceSource>,
    ) -> Self {
        Self {
            config,
            sink,
            sequence,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ArbitratorConfig {
        &self.config
    }

    /// Ask the external party about a tool use and wait for the outcome
    ///
    /// Always resolves to allow or deny: auto-approval allows immediately, an
    /// expired request is denied with a message naming the timeout, and a
    /// request that cannot be delivered is denied.
    pub async fn resolve_ask_user(
        &self,
        tool_name: &str,
        tool_input: Value,
        suggestions: Vec<String>,
        agent: &AgentIdentity,
    ) -> PermissionResult {
        if self.config.auto_approve {
            debug!(tool = %tool_name, "Auto-approving permission request");
            return PermissionResult::allow();
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(
            request_id.clone(),
            PendingPermission {
                info: PendingPermissionInfo {
                    request_id: request_id.clone(),
                    tool_name: tool_name.to_string(),
                    tool_input: tool_input.clone(),
                    agent: agent.clone(),
                    created_at: Utc::now(),
                },
                timer: None,
                resolver: tx,
            },
        );

        let timer = tokio::spawn(expire(
            Arc::clone(&self.pending),
            Arc::clone(&self.sink),
            Arc::clone(&self.sequence),
            request_id.clone(),
            agent.clone(),
            self.config.timeout,
        ));
        match lock(&self.pending).get_mut(&request_id) {
            Some(entry) => entry.timer = Some(timer.abort_handle()),
            None => timer.abort(),
        }

        info!(request_id = %request_id, tool = %tool_name, agent = %agent.agent_id, "Requesting permission");
        let event = PermissionEvent::PermissionRequest {
            seq: self.sequence.next_seq(),
            agent: agent.clone(),
            request_id: request_id.clone(),
            tool: PermissionToolInfo {
                name: tool_name.to_string(),
                input: tool_input,
                permission_suggestions: suggestions,
            },
        };
        if let Err(e) = self.sink.emit(event).await {
            warn!(request_id = %request_id, error = %e, "Failed to deliver permission request");
            let entry = lock(&self.pending).remove(&request_id);
            if let Some(entry) = entry {
                entry.resolve(PermissionResult::deny(format!(
                    "Failed to deliver permission request: {e}"
                )));
            }
        }

        rx.await
            .unwrap_or_else(|_| PermissionResult::deny(SESSION_ENDED_MESSAGE))
    }

    /// Apply an external decision
    ///
    /// Returns `false` when the request is unknown or already resolved.
    pub fn respond(&self, response: PermissionResponse) -> bool {
        let entry = lock(&self.pending).remove(&response.request_id);
        let Some(entry) = entry else {
            debug!(request_id = %response.request_id, "Ignoring response for unknown or resolved permission request");
            return false;
        };

        let result = if response.allow {
            PermissionResult::allow()
        } else {
            PermissionResult::deny(
                response
                    .message
                    .unwrap_or_else(|| DEFAULT_DENY_MESSAGE.to_string()),
            )
        };
        debug!(request_id = %response.request_id, allow = response.allow, "Permission request answered");
        entry.resolve(result);
        true
    }

    /// Deny every pending request with "Session ended"
    ///
    /// Returns the number of requests cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingPermission> = lock(&self.pending).drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            entry.resolve(PermissionResult::deny(SESSION_ENDED_MESSAGE));
        }
        if count > 0 {
            info!(count, "Cancelled pending permission requests");
        }
        count
    }

    /// Number of requests awaiting a decision
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Snapshot of the pending requests, oldest first
    pub fn pending_requests(&self) -> Vec<PendingPermissionInfo> {
        let mut requests: Vec<PendingPermissionInfo> = lock(&self.pending)
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        requests.sort_by_key(|info| info.created_at);
        requests
    }
}

impl std::fmt::Debug for PermissionArbitrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionArbitrator")
            .field("config", &self.config)
            .field("pending", &self.pending_count())
            .finish()
    }
}

async fn expire(
    pending: PendingTable,
    sink: Arc<dyn EventSink>,
    sequence: Arc<dyn SequenceSource>,
    request_id: String,
    agent: AgentIdentity,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;

    let entry = lock(&pending).remove(&request_id);
    let Some(mut entry) = entry else {
        return;
    };
    warn!(
        request_id = %request_id,
        tool = %entry.info.tool_name,
        timeout_secs = timeout.as_secs_f64(),
        "Permission request timed out"
    );
    // This task is the timer; do not abort ourselves before emitting
    entry.timer = None;
    entry.resolve(PermissionResult::deny(format!(
        "Permission request timed out after {} seconds",
        timeout.as_secs_f64()
    )));

    let event = PermissionEvent::PermissionTimeout {
        seq: sequence.next_seq(),
        agent,
        request_id,
    };
    if let Err(e) = sink.emit(event).await {
        warn!(error = %e, "Failed to deliver permission timeout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults_and_parsing() {
        let config = ArbitratorConfig::default();
        assert!(!config.auto_approve);
        assert_eq!(config.timeout, Duration::from_secs(300));

        let parsed: ArbitratorConfig =
            serde_json::from_str(r#"{"autoApprove": true, "timeoutSecs": 5}"#).unwrap();
        assert!(parsed.auto_approve);
        assert_eq!(parsed.timeout, Duration::from_secs(5));

        let partial: ArbitratorConfig = serde_json::from_str(r#"{"timeoutSecs": 9}"#).unwrap();
        assert!(!partial.auto_approve);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbitrator.json");
        std::fs::write(&path, r#"{"timeoutSecs": 42}"#).unwrap();
        assert_eq!(
            ArbitratorConfig::from_file(&path).unwrap().timeout,
            Duration::from_secs(42)
        );

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ArbitratorConfig::from_file(&path),
            Err(AgentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_event_wire_shape() {
        let event = PermissionEvent::PermissionRequest {
            seq: 3,
            agent: AgentIdentity::new("a1", "main").with_task("refactor"),
            request_id: "r1".to_string(),
            tool: PermissionToolInfo {
                name: "Bash".to_string(),
                input: json!({"command": "ls"}),
                permission_suggestions: vec!["Bash(ls:*)".to_string()],
            },
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "permission-request");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["agentId"], "a1");
        assert_eq!(value["agentType"], "main");
        assert_eq!(value["taskName"], "refactor");
        assert!(value.get("agentName").is_none());
        assert_eq!(value["requestId"], "r1");
        assert_eq!(value["tool"]["permission-suggestions"][0], "Bash(ls:*)");

        let timeout = PermissionEvent::PermissionTimeout {
            seq: 4,
            agent: AgentIdentity::new("a1", "main"),
            request_id: "r1".to_string(),
        };
        let value = serde_json::to_value(&timeout).unwrap();
        assert_eq!(value["type"], "permission-timeout");
        assert!(value.get("tool").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let response: PermissionResponse =
            serde_json::from_str(r#"{"requestId":"x","allow":false,"message":"nope"}"#).unwrap();
        assert_eq!(response, PermissionResponse::deny("x", "nope"));
    }

    #[tokio::test]
    async fn test_auto_approve_skips_sink() {
        let (sink, mut events) = ChannelEventSink::new();
        let arbitrator = PermissionArbitrator::new(
            ArbitratorConfig::default().with_auto_approve(true),
            Arc::new(sink),
            Arc::new(AtomicSequence::new()),
        );

        let result = arbitrator
            .resolve_ask_user("Write", json!({}), Vec::new(), &AgentIdentity::new("a", "main"))
            .await;
        assert!(result.is_allow());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_undeliverable_request_is_denied() {
        let (sink, events) = ChannelEventSink::new();
        drop(events);
        let arbitrator = PermissionArbitrator::new(
            ArbitratorConfig::default(),
            Arc::new(sink),
            Arc::new(AtomicSequence::new()),
        );

        let result = arbitrator
            .resolve_ask_user("Write", json!({}), Vec::new(), &AgentIdentity::new("a", "main"))
            .await;
        assert!(!result.is_allow());
        assert_eq!(arbitrator.pending_count(), 0);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let seq = AtomicSequence::starting_at(10);
        assert_eq!(seq.next_seq(), 10);
        assert_eq!(seq.next_seq(), 11);
    }
}
