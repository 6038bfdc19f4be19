//! Runtime glue: wires the configuration, driver, pool, trace, artifact
//! store, and persistence seams into the object the tool surface talks to.

use crate::artifacts::ArtifactStore;
use crate::config::RuntimeConfig;
use crate::driver::Driver;
use crate::engine::ActionCx;
use crate::error::AutomationError;
use crate::pool::{AcquireOptions, SessionPool};
use crate::redact::{sanitize, RedactionPolicy};
use crate::resilience::PopupDismisser;
use crate::session::BrowserSession;
use crate::store::{
    ActionLog, MemoryActionLog, MemorySessionStore, NewActionLogEntry, SessionRecord,
    SessionStatus, SessionStore,
};
use crate::trace::ActionTrace;
use serde_json::Value;
use std::sync::Arc;

pub struct Runtime {
    config: RuntimeConfig,
    pool: Arc<SessionPool>,
    trace: Arc<ActionTrace>,
    artifacts: Arc<ArtifactStore>,
    dismisser: Arc<PopupDismisser>,
    session_store: Arc<dyn SessionStore>,
    action_log: Arc<dyn ActionLog>,
    redaction: RedactionPolicy,
}

impl Runtime {
    /// Runtime with the in-memory reference stores.
    pub fn new(driver: Arc<dyn Driver>, config: RuntimeConfig) -> Arc<Self> {
        Self::with_stores(
            driver,
            config,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryActionLog::new()),
        )
    }

    pub fn with_stores(
        driver: Arc<dyn Driver>,
        config: RuntimeConfig,
        session_store: Arc<dyn SessionStore>,
        action_log: Arc<dyn ActionLog>,
    ) -> Arc<Self> {
        let pool = SessionPool::new(driver, config.pool_config());
        let artifacts = Arc::new(ArtifactStore::new(
            config.artifacts_dir.clone(),
            config.artifacts_max_sessions,
        ));
        let dismisser = Arc::new(PopupDismisser::new(Arc::new(config.dismiss_rules())));
        let redaction = config.redaction_policy();
        Arc::new(Self {
            config,
            pool,
            trace: Arc::new(ActionTrace::default()),
            artifacts,
            dismisser,
            session_store,
            action_log,
            redaction,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn trace(&self) -> &Arc<ActionTrace> {
        &self.trace
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.session_store
    }

    pub fn action_log(&self) -> &Arc<dyn ActionLog> {
        &self.action_log
    }

    pub fn redaction(&self) -> &RedactionPolicy {
        &self.redaction
    }

    /// The engine context for one session.
    pub fn action_cx(&self, session: &Arc<BrowserSession>) -> ActionCx {
        ActionCx {
            session: Arc::clone(session),
            dismisser: Arc::clone(&self.dismisser),
            trace: Arc::clone(&self.trace),
            artifacts: Some(Arc::clone(&self.artifacts)),
        }
    }

    pub fn session(&self, session_id: &str) -> Result<Arc<BrowserSession>, AutomationError> {
        self.pool.get_session(session_id).ok_or_else(|| {
            AutomationError::StaleElement(format!("unknown session: {session_id}"))
        })
    }

    /// Acquire a pool session and create its store record.
    pub async fn open_session(
        &self,
        profile: Option<String>,
        url: Option<String>,
    ) -> Result<Arc<BrowserSession>, AutomationError> {
        let session = self
            .pool
            .acquire(AcquireOptions {
                profile: profile.clone(),
                url,
            })
            .await?;
        if let Err(err) = self
            .session_store
            .create(SessionRecord::active(session.id(), profile))
            .await
        {
            tracing::warn!(session = %session.id(), "session record create: {err}");
        }
        Ok(session)
    }

    /// Snapshot to the store, close through the pool, mark the record.
    pub async fn close_session(&self, session_id: &str) -> Result<(), AutomationError> {
        if let Ok(snapshot) = self.pool.snapshot(session_id).await {
            if let Ok(value) = serde_json::to_value(&snapshot) {
                if let Err(err) = self.session_store.save_snapshot(session_id, value).await {
                    tracing::debug!(session = %session_id, "snapshot persist: {err}");
                }
            }
        }
        self.pool.release(session_id).await?;
        if let Err(err) = self
            .session_store
            .update_status(session_id, SessionStatus::Closed)
            .await
        {
            tracing::debug!(session = %session_id, "session record close: {err}");
        }
        self.trace.clear_session(session_id);
        Ok(())
    }

    /// Append to the action log with the input sanitised first, so every
    /// backend receives redacted data.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_action(
        &self,
        session_id: &str,
        action: &str,
        selector: Option<String>,
        input: Option<Value>,
        result: Value,
        screenshot_path: Option<String>,
        duration_ms: u64,
        retries: u32,
    ) {
        let input = input.map(|value| sanitize(&value, &self.redaction));
        let appended = self
            .action_log
            .append(NewActionLogEntry {
                session_id: session_id.to_string(),
                action: action.to_string(),
                selector,
                input,
                result,
                screenshot_path,
                duration_ms,
                retries,
            })
            .await;
        if let Err(err) = appended {
            tracing::warn!(action, "action log append: {err}");
        }
    }

    /// Startup hygiene: bound the artifact directory.
    pub async fn startup(&self) {
        if let Err(err) = self.artifacts.enforce_retention().await {
            tracing::debug!("startup retention sweep: {err}");
        }
    }

    /// Cooperative shutdown: suspend store records, close the pool, sweep
    /// artifacts.
    pub async fn shutdown(&self) {
        if let Err(err) = self.session_store.suspend_all().await {
            tracing::debug!("suspend_all: {err}");
        }
        self.pool.shutdown().await;
        if let Err(err) = self.artifacts.enforce_retention().await {
            tracing::debug!("shutdown retention sweep: {err}");
        }
    }
}
