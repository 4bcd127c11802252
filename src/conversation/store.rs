//! On-disk transcript lookup

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{reconstruct, Conversation};
use crate::error::{AgentError, Result};

const TRANSCRIPT_EXTENSION: &str = "jsonl";

/// Metadata for one stored session transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session id (file stem)
    pub session_id: String,
    /// Transcript path
    pub path: PathBuf,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// File size in bytes
    pub size: u64,
}

/// Transcripts stored as `<root>/<project>/<session>.jsonl`
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    root: PathBuf,
}

impl TranscriptStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.claude/projects`, if a home directory is known
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".claude").join("projects"))
    }

    /// Store at [`default_root`](Self::default_root)
    pub fn open_default() -> Result<Self> {
        Self::default_root()
            .map(Self::new)
            .ok_or_else(|| AgentError::invalid_config("Cannot locate home directory"))
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name the agent uses for a working directory
    ///
    /// Every character other than an ASCII letter or digit becomes `-`, so
    /// `/home/me/app` maps to `-home-me-app`.
    pub fn project_dir_name(project_path: &Path) -> String {
        project_path
            .to_string_lossy()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect()
    }

    /// Transcript path for a session
    pub fn session_path(&self, project: &str, session_id: &str) -> PathBuf {
        self.root
            .join(project)
            .join(format!("{session_id}.{TRANSCRIPT_EXTENSION}"))
    }

    /// Sessions stored for a project, newest first
    ///
    /// A project without a directory has no sessions.
    pub async fn list_sessions(&self, project: &str) -> Result<Vec<SessionSummary>> {
        let dir = self.root.join(project);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = ?dir, "Project directory not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(TRANSCRIPT_EXTENSION) {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = ?path, "Failed to stat transcript: {}", e);
                    continue;
                }
            };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            sessions.push(SessionSummary {
                session_id: session_id.to_string(),
                path: path.clone(),
                modified,
                size: metadata.len(),
            });
        }

        sessions.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(sessions)
    }

    /// Non-empty lines of a session transcript
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub async fn read_lines(&self, project: &str, session_id: &str) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(self.session_path(project, session_id)).await?;
        Ok(bytes
            .split(|b| *b == b'\n')
            .map(String::from_utf8_lossy)
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.into_owned())
            .collect())
    }

    /// Replay a stored session
    pub async fn load_conversation(&self, project: &str, session_id: &str) -> Result<Conversation> {
        let lines = self.read_lines(project, session_id).await?;
        debug!(session_id, lines = lines.len(), "Replaying transcript");
        Ok(reconstruct(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_dir_name() {
        assert_eq!(
            TranscriptStore::project_dir_name(Path::new("/home/me/my_app")),
            "-home-me-my-app"
        );
    }

    #[test]
    fn test_session_path() {
        let store = TranscriptStore::new("/data");
        assert_eq!(
            store.session_path("-proj", "abc"),
            PathBuf::from("/data/-proj/abc.jsonl")
        );
    }

    #[tokio::test]
    async fn test_missing_project_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());
        assert!(store.list_sessions("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_session_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());
        let err = store.load_conversation("p", "s").await.unwrap_err();
        assert!(matches!(err, AgentError::Io(_)));
    }
}
