//! Serialized line writer for process stdin

use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::BoxedWriter;
use crate::error::{AgentError, Result};

/// Shared handle that writes whole JSON lines to the agent
///
/// Writers are serialized so concurrent control responses and user messages
/// never interleave within a line.
#[derive(Clone)]
pub struct LineWriter {
    inner: Arc<Mutex<Option<BoxedWriter>>>,
}

impl LineWriter {
    /// Wrap process stdin
    pub fn new(stdin: BoxedWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(stdin))),
        }
    }

    /// Serialize `value` and write it as one line
    pub async fn write_json(&self, value: &serde_json::Value) -> Result<()> {
        let line = serde_json::to_string(value)?;
        self.write_line(&line).await
    }

    /// Write `line` followed by a newline and flush
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| AgentError::transport("stdin not available"))?;

        let mut data = String::with_capacity(line.len() + 1);
        data.push_str(line);
        data.push('\n');

        stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| AgentError::transport(format!("Failed to write to stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| AgentError::transport(format!("Failed to flush stdin: {e}")))?;
        Ok(())
    }

    /// Close stdin; later writes fail
    pub async fn shutdown(&self) {
        if let Some(mut stdin) = self.inner.lock().await.take() {
            let _ = stdin.shutdown().await;
        }
    }

    /// Whether stdin is still open
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

impl std::fmt::Debug for LineWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineWriter").finish_non_exhaustive()
    }
}
