//! Permission system for tool access control
//!
//! [`PermissionManager`] classifies a tool invocation against
//! [`PermissionRules`] as allow, deny or ask-user. Ask-user verdicts are
//! handed to a [`PermissionArbitrator`] which obtains an external decision.
//!
//! Rule syntax:
//! - `Bash`, `Write|Edit`, `mcp__*` match on tool name (`*` wildcards,
//!   `|` alternatives)
//! - `Bash(git:*)` additionally matches the command by prefix
//! - `Edit(/src/*)`, `Read(/etc/hosts)` match the file path

pub mod arbitrator;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{CanUseToolCallback, PermissionResult, ToolName, ToolPermissionContext};

pub use arbitrator::{
    AgentIdentity, ArbitratorConfig, AtomicSequence, ChannelEventSink, EventSink,
    PendingPermissionInfo, PermissionArbitrator, PermissionEvent, PermissionResponse,
    PermissionToolInfo, SequenceSource,
};

/// Tools whose permission pattern is keyed by the edited file
const FILE_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// Allow / ask / deny rule lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionRules {
    /// Patterns allowed without asking
    pub allow: Vec<String>,
    /// Patterns that always require a decision
    pub ask: Vec<String>,
    /// Patterns that are always refused
    pub deny: Vec<String>,
}

impl PermissionRules {
    /// Add an allow pattern
    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allow.push(pattern.into());
        self
    }

    /// Add an ask pattern
    pub fn ask(mut self, pattern: impl Into<String>) -> Self {
        self.ask.push(pattern.into());
        self
    }

    /// Add a deny pattern
    pub fn deny(mut self, pattern: impl Into<String>) -> Self {
        self.deny.push(pattern.into());
        self
    }
}

/// Outcome of rule evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionVerdict {
    /// Allowed by rule
    Allow,
    /// Refused, with the reason
    Deny(String),
    /// A human has to decide
    AskUser,
}

/// Rule-based evaluator for tool invocations
#[derive(Debug, Clone, Default)]
pub struct PermissionManager {
    rules: PermissionRules,
}

impl PermissionManager {
    /// Create a manager over `rules`
    pub fn new(rules: PermissionRules) -> Self {
        Self { rules }
    }

    /// Configured rules
    pub fn rules(&self) -> &PermissionRules {
        &self.rules
    }

    /// Classify a tool invocation
    ///
    /// Deny rules win over ask rules, ask rules over allow rules; anything
    /// unmatched needs a decision.
    pub fn evaluate(&self, tool_name: &str, input: &Value) -> PermissionVerdict {
        if let Some(rule) = first_match(&self.rules.deny, tool_name, input) {
            return PermissionVerdict::Deny(format!("Denied by rule {rule}"));
        }
        if first_match(&self.rules.ask, tool_name, input).is_some() {
            return PermissionVerdict::AskUser;
        }
        if first_match(&self.rules.allow, tool_name, input).is_some() {
            return PermissionVerdict::Allow;
        }
        PermissionVerdict::AskUser
    }

    /// Create a permission callback from a closure
    pub fn callback<F, Fut>(f: F) -> CanUseToolCallback
    where
        F: Fn(ToolName, Value, ToolPermissionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<PermissionResult>> + Send + 'static,
    {
        Arc::new(move |tool_name, tool_input, context| Box::pin(f(tool_name, tool_input, context)))
    }

    /// Combine this evaluator with an arbitrator into an engine callback
    ///
    /// Ask-user verdicts are forwarded to `arbitrator` on behalf of
    /// `identity`, suggesting the inferred pattern plus any rules the agent
    /// proposed.
    pub fn into_callback(
        self,
        arbitrator: Arc<PermissionArbitrator>,
        identity: AgentIdentity,
    ) -> CanUseToolCallback {
        let manager = Arc::new(self);
        Self::callback(move |tool_name, input, context| {
            let manager = Arc::clone(&manager);
            let arbitrator = Arc::clone(&arbitrator);
            let identity = identity.clone();
            async move {
                match manager.evaluate(tool_name.as_str(), &input) {
                    PermissionVerdict::Allow => Ok(PermissionResult::allow()),
                    PermissionVerdict::Deny(message) => Ok(PermissionResult::deny(message)),
                    PermissionVerdict::AskUser => {
                        let mut suggestions = vec![suggest_pattern(tool_name.as_str(), &input)];
                        for pattern in context.suggestions.iter().flat_map(|s| s.rule_patterns()) {
                            if !suggestions.contains(&pattern) {
                                suggestions.push(pattern);
                            }
                        }
                        Ok(arbitrator
                            .resolve_ask_user(tool_name.as_str(), input, suggestions, &identity)
                            .await)
                    }
                }
            }
        })
    }
}

/// Infer the permission pattern a user would grant for this invocation
///
/// `Bash` becomes `Bash(<program>:*)`, file-editing tools become
/// `<Tool>(<file_path>)`, anything else is the bare tool name.
pub fn suggest_pattern(tool_name: &str, input: &Value) -> String {
    if tool_name == "Bash" {
        if let Some(program) = input
            .get("command")
            .and_then(Value::as_str)
            .and_then(|command| command.split_whitespace().next())
        {
            return format!("Bash({program}:*)");
        }
    } else if FILE_TOOLS.contains(&tool_name) {
        if let Some(path) = input.get("file_path").and_then(Value::as_str) {
            return format!("{tool_name}({path})");
        }
    }
    tool_name.to_string()
}

fn first_match<'a>(rules: &'a [String], tool_name: &str, input: &Value) -> Option<&'a str> {
    rules
        .iter()
        .map(String::as_str)
        .find(|rule| rule_matches(rule, tool_name, input))
}

fn rule_matches(rule: &str, tool_name: &str, input: &Value) -> bool {
    let rule = rule.trim();
    let Some((tool_part, rest)) = rule.split_once('(') else {
        return name_matches(rule, tool_name);
    };
    let Some(spec) = rest.strip_suffix(')') else {
        return name_matches(rule, tool_name);
    };
    if !name_matches(tool_part, tool_name) {
        return false;
    }

    let Some(subject) = ["command", "file_path", "path", "notebook_path", "url"]
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
    else {
        return false;
    };
    match spec.strip_suffix(":*") {
        Some(prefix) => subject.starts_with(prefix),
        None => wildcard_match(spec, subject),
    }
}

fn name_matches(pattern: &str, tool_name: &str) -> bool {
    pattern
        .split('|')
        .any(|alt| wildcard_match(alt.trim(), tool_name))
}

/// `*`-only glob matching
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let source = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?s)^{source}$")).is_ok_and(|re| re.is_match(text))
}
