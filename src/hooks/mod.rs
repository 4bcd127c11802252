//! Hook system for intercepting agent events
//!
//! Hooks are declared per [`HookEvent`] as [`HookMatcher`]s. During
//! initialization every callback is assigned a process-lifetime unique id;
//! the agent later references that id in `hook_callback` control requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::Result;
use crate::types::{CallbackId, HookCallback, HookContext, HookEvent, HookMatcher, HookOutput};

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(0);

/// Allocate a fresh `hook_<n>` id, never reused within the process
pub fn next_callback_id() -> CallbackId {
    let n = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
    CallbackId::new(format!("hook_{n}"))
}

/// Registry of hook callbacks keyed by generated callback id
#[derive(Default)]
pub struct HookRegistry {
    callbacks: RwLock<HashMap<CallbackId, HookCallback>>,
}

impl HookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under a fresh id
    pub fn register(&self, callback: HookCallback) -> CallbackId {
        let id = next_callback_id();
        self.write().insert(id.clone(), callback);
        id
    }

    /// Look up a callback
    pub fn get(&self, id: &CallbackId) -> Option<HookCallback> {
        self.read().get(id).cloned()
    }

    /// Drop every registered callback
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no callback is registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Register every configured callback and build the `hooks` table sent
    /// with `initialize`
    ///
    /// Shape: `{"PreToolUse": [{"matcher": "Bash", "hookCallbackIds": ["hook_0"], "timeout": 30}]}`.
    /// Returns `None` when no hooks are configured.
    pub fn build_initialize_config(
        &self,
        hooks: &HashMap<HookEvent, Vec<HookMatcher>>,
    ) -> Option<Value> {
        let mut table = serde_json::Map::new();
        for (event, matchers) in hooks {
            if matchers.is_empty() {
                continue;
            }
            let entries: Vec<Value> = matchers
                .iter()
                .map(|matcher| {
                    let ids: Vec<String> = matcher
                        .hooks
                        .iter()
                        .map(|callback| self.register(Arc::clone(callback)).as_str().to_string())
                        .collect();
                    let mut entry = json!({
                        "matcher": matcher.matcher,
                        "hookCallbackIds": ids,
                    });
                    if let Some(timeout) = matcher.timeout {
                        entry["timeout"] = json!(timeout.as_secs_f64());
                    }
                    entry
                })
                .collect();
            table.insert(event.as_str().to_string(), Value::Array(entries));
        }

        if table.is_empty() {
            None
        } else {
            Some(Value::Object(table))
        }
    }

    /// Create a hook callback from a closure
    pub fn callback<F, Fut>(f: F) -> HookCallback
    where
        F: Fn(Value, Option<String>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<HookOutput>> + Send + 'static,
    {
        Arc::new(move |input, tool_use_id, context| Box::pin(f(input, tool_use_id, context)))
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CallbackId, HookCallback>> {
        self.callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CallbackId, HookCallback>> {
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("callbacks", &self.len())
            .finish()
    }
}

/// Builder for creating hook matchers
pub struct HookMatcherBuilder {
    matcher: Option<String>,
    hooks: Vec<HookCallback>,
    timeout: Option<Duration>,
}

impl HookMatcherBuilder {
    /// Create a new hook matcher builder
    ///
    /// # Arguments
    /// * `pattern` - Matcher pattern (None for all, or specific tool name/pattern)
    pub fn new(pattern: Option<impl Into<String>>) -> Self {
        Self {
            matcher: pattern.map(|p| p.into()),
            hooks: Vec::new(),
            timeout: None,
        }
    }

    /// Add a hook callback
    pub fn add_hook(mut self, hook: HookCallback) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Timeout declared to the agent for each callback
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the hook matcher
    pub fn build(self) -> HookMatcher {
        HookMatcher {
            matcher: self.matcher,
            hooks: self.hooks,
            timeout: self.timeout,
        }
    }
}
