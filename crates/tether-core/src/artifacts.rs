//! Artifact Writer
//!
//! Screenshots, HTML dumps, and PDFs land under
//! `{base}/{sessionId}/{epochMs}-{action}[-{label}].{ext}`. Session ids are
//! validated against path escapes, and a retention policy keeps the base
//! directory bounded to the most recent sessions by mtime.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

pub const DEFAULT_MAX_SESSIONS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("artifact io: {0}")]
    Io(#[from] std::io::Error),
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").unwrap())
}

pub struct ArtifactStore {
    base_dir: PathBuf,
    max_sessions: usize,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>, max_sessions: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub async fn write_screenshot(
        &self,
        session_id: &str,
        action: &str,
        label: Option<&str>,
        bytes: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.write(session_id, action, label, "png", bytes).await?;
        // Screenshots are the high-volume artifact; retention rides on them.
        if let Err(err) = self.enforce_retention().await {
            tracing::debug!("artifact retention sweep failed: {err}");
        }
        Ok(path)
    }

    pub async fn write_html(
        &self,
        session_id: &str,
        action: &str,
        label: Option<&str>,
        html: &str,
    ) -> Result<PathBuf, ArtifactError> {
        self.write(session_id, action, label, "html", html.as_bytes())
            .await
    }

    pub async fn write_pdf(
        &self,
        session_id: &str,
        action: &str,
        label: Option<&str>,
        bytes: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        self.write(session_id, action, label, "pdf", bytes).await
    }

    async fn write(
        &self,
        session_id: &str,
        action: &str,
        label: Option<&str>,
        ext: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        if !id_pattern().is_match(session_id) {
            return Err(ArtifactError::InvalidSessionId(session_id.to_string()));
        }

        let dir = self.base_dir.join(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let epoch_ms = chrono::Utc::now().timestamp_millis();
        let mut name = format!("{epoch_ms}-{}", sanitise(action));
        if let Some(label) = label {
            name.push('-');
            name.push_str(&sanitise(label));
        }
        let path = dir.join(format!("{name}.{ext}"));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Keep at most `max_sessions` session directories, most recent by
    /// mtime. Returns how many were removed.
    pub async fn enforce_retention(&self) -> Result<usize, ArtifactError> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut dirs: Vec<(PathBuf, SystemTime)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                dirs.push((entry.path(), mtime));
            }
        }

        if dirs.len() <= self.max_sessions {
            return Ok(0);
        }

        // Newest first; everything past the cap goes.
        dirs.sort_by(|a, b| b.1.cmp(&a.1));
        let mut removed = 0;
        for (path, _) in dirs.drain(self.max_sessions..) {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(dir = %path.display(), "evicted artifact directory");
                }
                Err(err) => tracing::debug!(dir = %path.display(), "retention skip: {err}"),
            }
        }
        Ok(removed)
    }
}

fn sanitise(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), 10);
        let err = store
            .write_screenshot("../evil", "click", None, b"png")
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidSessionId(_)));
    }

    #[tokio::test]
    async fn names_carry_epoch_action_and_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), 10);
        let path = store
            .write_screenshot("sess_1", "click", Some("failure"), b"png")
            .await
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("-click-failure.png"), "got {name}");
        assert!(path.starts_with(dir.path().join("sess_1")));
    }

    #[tokio::test]
    async fn retention_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), 2);
        for id in ["old", "mid", "new"] {
            tokio::fs::create_dir_all(dir.path().join(id)).await.unwrap();
            // Space out mtimes so recency ordering is unambiguous.
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        }

        let removed = store.enforce_retention().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("old").exists());
        assert!(dir.path().join("mid").exists());
        assert!(dir.path().join("new").exists());
    }
}
