//! Persistence seams: the session-record store and the append-only action
//! log. The SQL backend is a deployment detail behind these traits; the
//! in-memory implementations here make the runtime complete on their own
//! and back the test-suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("store backend: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn active(id: impl Into<String>, profile: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            profile,
            status: SessionStatus::Active,
            snapshot: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, record: SessionRecord) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;
    async fn update_status(&self, id: &str, status: SessionStatus) -> Result<(), StoreError>;
    async fn save_snapshot(&self, id: &str, snapshot: Value) -> Result<(), StoreError>;
    async fn list_by_status(&self, status: SessionStatus)
        -> Result<Vec<SessionRecord>, StoreError>;
    async fn suspend_all(&self) -> Result<usize, StoreError>;
    async fn close_all(&self) -> Result<usize, StoreError>;
}

/// Action-log entry as appended by the runtime. `input` must already be
/// sanitised (see [`crate::redact`]); the log stores what it is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: u64,
    pub session_id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    pub duration_ms: u64,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

/// The same entry before the log assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewActionLogEntry {
    pub session_id: String,
    pub action: String,
    pub selector: Option<String>,
    pub input: Option<Value>,
    pub result: Value,
    pub screenshot_path: Option<String>,
    pub duration_ms: u64,
    pub retries: u32,
}

#[async_trait]
pub trait ActionLog: Send + Sync {
    async fn append(&self, entry: NewActionLogEntry) -> Result<u64, StoreError>;
    async fn by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionLogEntry>, StoreError>;
    async fn recent(&self, limit: usize) -> Result<Vec<ActionLogEntry>, StoreError>;
    async fn count_by_session(&self, session_id: &str) -> Result<u64, StoreError>;
    async fn failures_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ActionLogEntry>, StoreError>;
}

// In-memory reference implementations. In a deployment these would be a
// database; the traits above are the seam.

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    records: Arc<Mutex<HashMap<String, SessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, record: SessionRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.id) {
            return Err(StoreError::Conflict(record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn update_status(&self, id: &str, status: SessionStatus) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save_snapshot(&self, id: &str, snapshot: Value) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.snapshot = Some(snapshot);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let records = self.records.lock().unwrap();
        let mut out: Vec<SessionRecord> = records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn suspend_all(&self) -> Result<usize, StoreError> {
        let mut records = self.records.lock().unwrap();
        let mut changed = 0;
        for record in records.values_mut() {
            if record.status == SessionStatus::Active {
                record.status = SessionStatus::Suspended;
                record.updated_at = Utc::now();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn close_all(&self) -> Result<usize, StoreError> {
        let mut records = self.records.lock().unwrap();
        let mut changed = 0;
        for record in records.values_mut() {
            if record.status != SessionStatus::Closed {
                record.status = SessionStatus::Closed;
                record.updated_at = Utc::now();
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[derive(Clone, Default)]
pub struct MemoryActionLog {
    entries: Arc<Mutex<Vec<ActionLogEntry>>>,
}

impl MemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionLog for MemoryActionLog {
    async fn append(&self, entry: NewActionLogEntry) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let id = entries.len() as u64 + 1;
        entries.push(ActionLogEntry {
            id,
            session_id: entry.session_id,
            action: entry.action,
            selector: entry.selector,
            input: entry.input,
            result: entry.result,
            screenshot_path: entry.screenshot_path,
            duration_ms: entry.duration_ms,
            retries: entry.retries,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionLogEntry>, StoreError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ActionLogEntry>, StoreError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    async fn count_by_session(&self, session_id: &str) -> Result<u64, StoreError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().filter(|e| e.session_id == session_id).count() as u64)
    }

    async fn failures_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ActionLogEntry>, StoreError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| {
                e.session_id == session_id
                    && e.result.get("ok").and_then(Value::as_bool) == Some(false)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn session_store_lifecycle() {
        let store = MemorySessionStore::new();
        store
            .create(SessionRecord::active("s1", Some("work".into())))
            .await
            .unwrap();
        store
            .create(SessionRecord::active("s2", None))
            .await
            .unwrap();

        assert!(matches!(
            store.create(SessionRecord::active("s1", None)).await,
            Err(StoreError::Conflict(_))
        ));

        let suspended = store.suspend_all().await.unwrap();
        assert_eq!(suspended, 2);
        assert_eq!(
            store
                .list_by_status(SessionStatus::Suspended)
                .await
                .unwrap()
                .len(),
            2
        );

        store.close_all().await.unwrap();
        assert_eq!(
            store.get("s1").await.unwrap().unwrap().status,
            SessionStatus::Closed
        );
    }

    #[tokio::test]
    async fn action_log_queries() {
        let log = MemoryActionLog::new();
        for (action, ok) in [("click", true), ("type", false), ("click", true)] {
            log.append(NewActionLogEntry {
                session_id: "s1".into(),
                action: action.into(),
                selector: None,
                input: None,
                result: json!({ "ok": ok }),
                screenshot_path: None,
                duration_ms: 12,
                retries: 0,
            })
            .await
            .unwrap();
        }

        assert_eq!(log.count_by_session("s1").await.unwrap(), 3);
        assert_eq!(log.by_session("s1", 2).await.unwrap().len(), 2);
        let failures = log.failures_by_session("s1").await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].action, "type");
    }
}
