//! Subprocess transport implementation using the agent CLI

use async_trait::async_trait;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{ProcessIo, Transport};
use crate::error::{AgentError, Result};
use crate::types::EngineOptions;
use crate::VERSION;

const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

// Dangerous environment variables that should not be passed to subprocess
const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

// Allowed extra CLI flags (allowlist approach)
const ALLOWED_EXTRA_FLAGS: &[&str] = &["timeout", "retries", "log-level", "cache-dir"];

/// Subprocess transport for the agent CLI in stream-json mode
pub struct SubprocessTransport {
    options: EngineOptions,
    cli_path: PathBuf,
    process: Option<Child>,
}

impl SubprocessTransport {
    /// Create a new subprocess transport
    ///
    /// # Errors
    /// Returns error if no CLI path is configured and none can be found
    pub fn new(options: EngineOptions) -> Result<Self> {
        let cli_path = match options.cli_path.clone() {
            Some(path) => path,
            None => Self::find_cli()?,
        };
        Ok(Self {
            options,
            cli_path,
            process: None,
        })
    }

    /// Path of the CLI this transport launches
    pub fn cli_path(&self) -> &PathBuf {
        &self.cli_path
    }

    /// Find the agent CLI binary
    fn find_cli() -> Result<PathBuf> {
        if let Ok(path) = which::which("claude") {
            return Ok(path);
        }

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let locations = [
            home.join(".npm-global/bin/claude"),
            PathBuf::from("/usr/local/bin/claude"),
            home.join(".local/bin/claude"),
            home.join("node_modules/.bin/claude"),
            home.join(".yarn/bin/claude"),
        ];

        locations
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(AgentError::cli_not_found)
    }

    /// Build CLI command with all arguments
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.cli_path);

        cmd.arg("--output-format")
            .arg("stream-json")
            .arg("--input-format")
            .arg("stream-json")
            .arg("--verbose");

        if let Some(ref model) = self.options.model {
            cmd.arg("--model").arg(model);
        }

        if self.options.can_use_tool.is_some() {
            cmd.arg("--permission-prompt-tool").arg("stdio");
        }

        if let Some(mode) = self.options.permission_mode {
            cmd.arg("--permission-mode").arg(mode.as_str());
        }

        if self.options.continue_conversation {
            cmd.arg("--continue");
        }

        if let Some(ref session_id) = self.options.resume {
            cmd.arg("--resume").arg(session_id.as_str());
        }

        if !self.options.mcp_servers.is_empty() {
            let servers: serde_json::Map<String, serde_json::Value> = self
                .options
                .mcp_servers
                .iter()
                .map(|(name, server)| (name.clone(), server.config_entry()))
                .collect();
            let config_json = serde_json::json!({ "mcpServers": servers });
            cmd.arg("--mcp-config").arg(config_json.to_string());
        }

        // Extra args - only allow safe flags from allowlist
        for (flag, value) in &self.options.extra_args {
            if !ALLOWED_EXTRA_FLAGS.contains(&flag.as_str()) {
                warn!(flag = %flag, "Ignoring extra CLI flag outside the allowlist");
                continue;
            }
            cmd.arg(format!("--{flag}"));
            if let Some(v) = value {
                cmd.arg(v);
            }
        }

        cmd
    }

    /// Environment for the child: inherited variables plus safe overrides
    fn process_env(&self) -> HashMap<String, String> {
        let mut process_env = env::vars().collect::<HashMap<_, _>>();

        for (key, value) in &self.options.env {
            if DANGEROUS_ENV_VARS.contains(&key.as_str()) {
                warn!(key = %key, "Refusing to override dangerous environment variable");
            } else {
                process_env.insert(key.clone(), value.clone());
            }
        }

        process_env.insert("CLAUDE_CODE_ENTRYPOINT".to_string(), "sdk-rust".to_string());
        process_env.insert("AGENT_CONTROL_VERSION".to_string(), VERSION.to_string());

        if let Some(ref cwd) = self.options.cwd {
            process_env.insert("PWD".to_string(), cwd.to_string_lossy().to_string());
        }

        process_env
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn connect(&mut self) -> Result<ProcessIo> {
        if self.process.is_some() {
            return Err(AgentError::connection("Agent process already started"));
        }

        let mut cmd = self.build_command();
        cmd.envs(self.process_env());
        if let Some(ref cwd) = self.options.cwd {
            cmd.current_dir(cwd);
        }

        // stderr is piped so the child never touches the parent terminal
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = self.options.cwd {
                if !cwd.exists() {
                    return AgentError::connection(format!(
                        "Working directory does not exist: {}",
                        cwd.display()
                    ));
                }
            }
            AgentError::connection(format!("Failed to start agent CLI: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stderr handle"))?;

        info!(cli = %self.cli_path.display(), pid = ?child.id(), "Agent process started");
        self.process = Some(child);

        Ok(ProcessIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Some(Box::new(stderr)),
        })
    }

    fn is_ready(&self) -> bool {
        self.process.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut child) = self.process.take() else {
            return Ok(());
        };

        match tokio::time::timeout(CLOSE_GRACE_PERIOD, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "Agent process exited");
            }
            Ok(Err(e)) => return Err(AgentError::Io(e)),
            Err(_) => {
                warn!("Agent process did not exit in time, killing it");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
        Ok(())
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
        }
    }
}

impl std::fmt::Debug for SubprocessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessTransport")
            .field("cli_path", &self.cli_path)
            .field("running", &self.process.is_some())
            .finish()
    }
}
