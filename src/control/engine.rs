//! Control protocol engine
//!
//! One [`ControlEngine`] owns one agent process. Three background tasks run
//! per engine:
//!
//! ```text
//!  stdout/stderr ──> StreamReader ──> router ──┬─> control_response ─> pending slots
//!                                              ├─> control_request ──> request worker ─> LineWriter ─> stdin
//!                                              └─> everything else ──> subscribers
//! ```
//!
//! The router never blocks on callbacks, so a permission or hook callback may
//! itself issue commands (for example `interrupt`) without deadlocking.
//! Incoming control requests are handled one at a time, in arrival order.
//!
//! Closing the engine still answers every control request the agent sent:
//! the callback in progress is abandoned, `can_use_tool` requests are denied
//! with "Session ended" and anything else gets an error response. Only then
//! is stdin shut.

use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{
    command_message, error_response, permission_payload, success_response, ControlCommand,
    ControlRequestKind, IncomingControlRequest, PendingRequests, RequestIdGenerator,
    KNOWN_REQUEST_SUBTYPES,
};
use crate::error::{AgentError, Result};
use crate::hooks::HookRegistry;
use crate::mcp::SdkMcpServer;
use crate::message::Response;
use crate::permissions::arbitrator::SESSION_ENDED_MESSAGE;
use crate::permissions::PermissionArbitrator;
use crate::transport::{
    Broadcaster, LineWriter, StreamReader, Subscription, SubprocessTransport, Transport,
    DEFAULT_MAX_LINE_LENGTH,
};
use crate::types::{
    CanUseToolCallback, EngineOptions, HookContext, HookEvent, HookMatcher, HookOutput,
    PermissionMode, PermissionResult, SessionId, UserContent,
};

/// Upper bound on flushing close-time replies before the worker is aborted
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a [`ControlEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Connected, `initialize` not yet called
    Uninitialized,
    /// `initialize` in flight
    Initializing,
    /// Ready for commands
    Active,
    /// Closed; no further traffic
    Closed,
}

struct EngineInner {
    can_use_tool: Option<CanUseToolCallback>,
    hook_config: HashMap<HookEvent, Vec<HookMatcher>>,
    needs_initialize: bool,
    hooks: HookRegistry,
    mcp_servers: RwLock<HashMap<String, Arc<SdkMcpServer>>>,
    arbitrator: Option<Arc<PermissionArbitrator>>,
    writer: LineWriter,
    pending: PendingRequests,
    ids: RequestIdGenerator,
    events: Broadcaster<Response>,
    state: Mutex<EngineState>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<AbortHandle>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
}

/// Engine multiplexing control traffic and conversation traffic for one
/// agent process
pub struct ControlEngine {
    inner: Arc<EngineInner>,
}

impl ControlEngine {
    /// Spawn the agent CLI and start an engine for it
    ///
    /// # Errors
    /// Returns error if the CLI cannot be found or started, or initialization fails
    pub async fn spawn(options: EngineOptions) -> Result<Self> {
        let transport = SubprocessTransport::new(options.clone())?;
        Self::start(transport, options).await
    }

    /// Connect `transport`, start the background tasks and initialize
    ///
    /// # Errors
    /// Returns error if connecting or initialization fails
    pub async fn start<T>(transport: T, options: EngineOptions) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let engine = Self::new(transport, options).await?;
        if let Err(e) = engine.initialize().await {
            if let Err(close_err) = engine.close().await {
                warn!(error = %close_err, "Failed to close engine after initialization error");
            }
            return Err(e);
        }
        Ok(engine)
    }

    /// Connect `transport` and start the background tasks, leaving the
    /// engine uninitialized
    ///
    /// # Errors
    /// Returns error if the transport fails to connect
    pub async fn new<T>(mut transport: T, options: EngineOptions) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let io = transport.connect().await?;

        let raw = Broadcaster::new();
        let raw_subscription = raw.subscribe();
        let reader = StreamReader::spawn(
            io.stdout,
            io.stderr,
            raw,
            options.max_buffer_size.unwrap_or(DEFAULT_MAX_LINE_LENGTH),
        );

        let needs_initialize = options.needs_initialize();

        let inner = Arc::new(EngineInner {
            can_use_tool: options.can_use_tool,
            hook_config: options.hooks,
            needs_initialize,
            hooks: HookRegistry::new(),
            mcp_servers: RwLock::new(options.mcp_servers),
            arbitrator: options.arbitrator,
            writer: LineWriter::new(io.stdin),
            pending: PendingRequests::new(),
            ids: RequestIdGenerator::new(),
            events: Broadcaster::new(),
            state: Mutex::new(EngineState::Uninitialized),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            worker: Mutex::new(None),
            transport: tokio::sync::Mutex::new(Box::new(transport)),
        });

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route(Arc::clone(&inner), raw_subscription, request_tx));
        let worker = tokio::spawn(serve_requests(Arc::clone(&inner), request_rx));
        lock(&inner.tasks).extend([reader.abort_handle(), router.abort_handle()]);
        *lock(&inner.worker) = Some(worker);

        debug!(needs_initialize, "Control engine started");
        Ok(Self { inner })
    }

    /// Perform the initialization handshake
    ///
    /// Registers every configured hook callback and sends `initialize` when
    /// hooks or a permission callback are configured; otherwise the engine
    /// becomes active without any traffic. Returns the agent's reply, if a
    /// handshake took place.
    ///
    /// # Errors
    /// Returns [`AgentError::AlreadyInitialized`] on any call after the first,
    /// or the handshake's failure (the engine then returns to uninitialized)
    pub async fn initialize(&self) -> Result<Option<Value>> {
        {
            let mut state = lock(&self.inner.state);
            match *state {
                EngineState::Uninitialized => *state = EngineState::Initializing,
                EngineState::Closed => return Err(AgentError::EngineClosed),
                EngineState::Initializing | EngineState::Active => {
                    return Err(AgentError::AlreadyInitialized)
                }
            }
        }

        if !self.inner.needs_initialize {
            self.inner.advance(EngineState::Initializing, EngineState::Active);
            return Ok(None);
        }

        let hooks = self
            .inner
            .hooks
            .build_initialize_config(&self.inner.hook_config);
        match self.request(ControlCommand::Initialize { hooks }).await {
            Ok(reply) => {
                self.inner.advance(EngineState::Initializing, EngineState::Active);
                info!(hooks = self.inner.hooks.len(), "Control engine initialized");
                Ok(Some(reply))
            }
            Err(e) => {
                self.inner.hooks.clear();
                self.inner
                    .advance(EngineState::Initializing, EngineState::Uninitialized);
                Err(e)
            }
        }
    }

    /// Interrupt the agent's current turn
    ///
    /// # Errors
    /// Returns error if the engine is not active or the agent rejects the request
    pub async fn interrupt(&self) -> Result<Value> {
        self.command(ControlCommand::Interrupt).await
    }

    /// Change the permission mode
    ///
    /// # Errors
    /// Returns error if the engine is not active or the agent rejects the request
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<Value> {
        self.command(ControlCommand::SetPermissionMode { mode }).await
    }

    /// Switch model; `None` restores the default
    ///
    /// # Errors
    /// Returns error if the engine is not active or the agent rejects the request
    pub async fn set_model(&self, model: Option<String>) -> Result<Value> {
        self.command(ControlCommand::SetModel { model }).await
    }

    /// Restore files to their state at a prior user message
    ///
    /// # Errors
    /// Returns error if the engine is not active or the agent rejects the request
    pub async fn rewind_files(&self, user_message_id: impl Into<String>) -> Result<Value> {
        self.command(ControlCommand::RewindFiles {
            user_message_id: user_message_id.into(),
        })
        .await
    }

    /// Write a plain user message
    ///
    /// # Errors
    /// Returns error if the engine is closed or stdin is gone
    pub async fn send_message(&self, content: impl Into<UserContent>) -> Result<()> {
        if self.is_closed() {
            return Err(AgentError::EngineClosed);
        }
        let message = json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": content.into(),
            },
        });
        self.inner.writer.write_json(&message).await
    }

    /// Listen to conversation traffic
    ///
    /// A subscription starts at the moment it is created; events published
    /// while nobody is subscribed are dropped, so subscribe before sending
    /// the first message. Control envelopes are consumed by the engine and
    /// never appear here. The last event is a `Completion` once the process
    /// output ends.
    pub fn subscribe(&self) -> Subscription<Response> {
        self.inner.events.subscribe()
    }

    /// Register or replace an in-process MCP server
    pub fn add_mcp_server(&self, server: SdkMcpServer) {
        let mut servers = self
            .inner
            .mcp_servers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        servers.insert(server.name().to_string(), Arc::new(server));
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        *lock(&self.inner.state)
    }

    /// Whether [`ControlEngine::close`] has run
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Outgoing requests still awaiting a response
    pub fn pending_request_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Shut the engine down
    ///
    /// Stops reading agent output, ends every subscription, clears hook
    /// callbacks and MCP servers, fails pending requests with
    /// [`AgentError::EngineClosed`], and denies pending permission requests.
    /// Control requests from the agent that are still unanswered get their
    /// close-time reply before the transport is closed. Calling it again is a
    /// no-op.
    ///
    /// # Errors
    /// Returns error if the transport fails to close
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *lock(&self.inner.state) = EngineState::Closed;

        self.inner.shutdown.cancel();
        self.inner.abort_tasks();
        self.inner.events.close();
        self.inner.hooks.clear();
        let failed = self.inner.pending.close(|| AgentError::EngineClosed);
        self.inner
            .mcp_servers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        let denied = self
            .inner
            .arbitrator
            .as_ref()
            .map_or(0, |arbitrator| arbitrator.cancel_all());
        info!(failed, denied, "Closing control engine");

        // Runs detached so that a close issued from inside a callback, which
        // the worker abandons, still releases the process.
        let inner = Arc::clone(&self.inner);
        let teardown = tokio::spawn(async move {
            inner.finish_worker().await;
            inner.writer.shutdown().await;
            inner.transport.lock().await.close().await
        });
        teardown
            .await
            .map_err(|e| AgentError::transport(format!("Engine teardown failed: {e}")))?
    }

    async fn command(&self, command: ControlCommand) -> Result<Value> {
        match self.state() {
            EngineState::Active => self.request(command).await,
            EngineState::Closed => Err(AgentError::EngineClosed),
            EngineState::Uninitialized | EngineState::Initializing => {
                Err(AgentError::NotInitialized)
            }
        }
    }

    async fn request(&self, command: ControlCommand) -> Result<Value> {
        let request_id = self.inner.ids.next_id();
        let message = command_message(&request_id, &command)?;
        let slot = self.inner.pending.register(request_id.clone())?;

        if let Err(e) = self.inner.writer.write_json(&message).await {
            self.inner.pending.forget(&request_id);
            return Err(e);
        }
        debug!(request_id = %request_id, subtype = command.subtype(), "Sent control request");

        slot.await.unwrap_or(Err(AgentError::EngineClosed))
    }
}

impl Drop for ControlEngine {
    fn drop(&mut self) {
        if !self.inner.closed.load(Ordering::SeqCst) {
            self.inner.shutdown.cancel();
            self.inner.abort_tasks();
            if let Some(worker) = lock(&self.inner.worker).take() {
                worker.abort();
            }
        }
    }
}

impl std::fmt::Debug for ControlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlEngine")
            .field("state", &self.state())
            .field("pending", &self.pending_request_count())
            .field("hooks", &self.inner.hooks.len())
            .finish()
    }
}

impl EngineInner {
    fn advance(&self, from: EngineState, to: EngineState) {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
        }
    }

    fn abort_tasks(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    /// Let the request worker write its close-time replies and exit
    async fn finish_worker(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        let abort = worker.abort_handle();
        if tokio::time::timeout(CLOSE_GRACE, worker).await.is_err() {
            warn!("Request worker did not finish after close; aborting");
            abort.abort();
        }
    }

    fn mcp_server(&self, name: &str) -> Option<Arc<SdkMcpServer>> {
        self.mcp_servers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    async fn handle_request(&self, request: ControlRequestKind) -> Result<Value> {
        match request {
            ControlRequestKind::CanUseTool {
                tool_name,
                input,
                context,
            } => {
                let Some(callback) = self.can_use_tool.clone() else {
                    return Ok(permission_payload(PermissionResult::allow(), &input));
                };
                let result = callback(tool_name, input.clone(), context).await?;
                Ok(permission_payload(result, &input))
            }
            ControlRequestKind::HookCallback {
                callback_id,
                tool_use_id,
                input,
            } => {
                let Some(callback) = self.hooks.get(&callback_id) else {
                    warn!(callback_id = %callback_id.as_str(), "No hook registered for callback id");
                    return Ok(serde_json::to_value(HookOutput::allow())?);
                };
                let context = HookContext {
                    session_id: input
                        .get("session_id")
                        .and_then(Value::as_str)
                        .map(SessionId::new),
                };
                let output = callback(input, tool_use_id, context).await?;
                Ok(serde_json::to_value(output)?)
            }
            ControlRequestKind::McpMessage {
                server_name,
                message,
            } => {
                let server = self
                    .mcp_server(&server_name)
                    .ok_or_else(|| AgentError::mcp(format!("Unknown MCP server: {server_name}")))?;
                let reply = server.handle_message(message).await?;
                Ok(json!({ "mcp_response": reply }))
            }
            ControlRequestKind::Unknown { kind, .. } => {
                if KNOWN_REQUEST_SUBTYPES.contains(&kind.as_str()) {
                    Err(AgentError::control_protocol(format!(
                        "Malformed {kind} request"
                    )))
                } else {
                    debug!(subtype = %kind, "Acknowledging unsupported control request");
                    Ok(json!({}))
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn route(
    inner: Arc<EngineInner>,
    mut raw: Subscription<Response>,
    requests: mpsc::UnboundedSender<IncomingControlRequest>,
) {
    while let Some(response) = raw.recv().await {
        match response {
            Response::ControlResponse(envelope) => {
                let request_id = envelope.request_id().clone();
                if !inner.pending.complete(envelope) {
                    debug!(request_id = %request_id, "Dropping control response with no pending request");
                }
            }
            Response::ControlRequest(request) => {
                if requests.send(request).is_err() {
                    break;
                }
            }
            other => {
                inner.events.publish(other);
            }
        }
    }

    inner.events.close();
    let failed = inner
        .pending
        .close(|| AgentError::transport("Agent output ended before the response arrived"));
    if failed > 0 {
        warn!(failed, "Agent output ended with control requests outstanding");
    }
}

async fn serve_requests(
    inner: Arc<EngineInner>,
    mut requests: mpsc::UnboundedReceiver<IncomingControlRequest>,
) {
    while let Some(IncomingControlRequest {
        request_id,
        request,
    }) = requests.recv().await
    {
        debug!(request_id = %request_id, "Handling control request");
        let on_close = closing_reply(&request);
        let outcome = if inner.shutdown.is_cancelled() {
            on_close
        } else {
            tokio::select! {
                outcome = AssertUnwindSafe(inner.handle_request(request)).catch_unwind() => {
                    outcome.unwrap_or_else(|_| {
                        Err(AgentError::control_protocol("Control request handler panicked"))
                    })
                }
                () = inner.shutdown.cancelled() => {
                    debug!(request_id = %request_id, "Abandoning control request on close");
                    on_close
                }
            }
        };

        let reply = match outcome {
            Ok(payload) => success_response(&request_id, payload),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Control request failed");
                error_response(&request_id, &e.to_string())
            }
        };
        if let Err(e) = inner.writer.write_json(&reply).await {
            warn!(request_id = %request_id, error = %e, "Failed to send control response");
        }
    }
}

/// Reply for a control request the engine can no longer serve
fn closing_reply(request: &ControlRequestKind) -> Result<Value> {
    match request {
        ControlRequestKind::CanUseTool { input, .. } => Ok(permission_payload(
            PermissionResult::deny(SESSION_ENDED_MESSAGE),
            input,
        )),
        _ => Err(AgentError::EngineClosed),
    }
}
