//! Browser Session
//!
//! Pairs an isolated context with its active page, owns the per-session
//! handle registry, and exposes snapshot/restore. The session id outlives
//! the underlying context: pool auto-recovery swaps the context while the
//! id stays valid for external references.

use crate::driver::{BrowserContext, Cookie, LoadState, Page, PageEvent};
use crate::error::AutomationError;
use crate::handle::HandleRegistry;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

const RESTORE_NAV_TIMEOUT: Duration = Duration::from_secs(30);

const LOCAL_STORAGE_DUMP: &str = r#"
(() => {
  try {
    const out = {};
    for (let i = 0; i < localStorage.length; i++) {
      const key = localStorage.key(i);
      out[key] = localStorage.getItem(key);
    }
    return out;
  } catch (e) {
    return {};
  }
})()
"#;

/// Serialisable capture of a session's URL, cookies, and local storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub url: String,
    pub cookies: Vec<Cookie>,
    pub local_storage: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

pub struct BrowserSession {
    id: String,
    profile: Option<String>,
    context: Arc<dyn BrowserContext>,
    page: RwLock<Arc<dyn Page>>,
    healthy: AtomicBool,
    handles: HandleRegistry,
    listener: Mutex<Option<JoinHandle<()>>>,
    last_snapshot_at: Mutex<DateTime<Utc>>,
    // Set once in `new`; the crash listener holds a weak handle so a closed
    // session does not keep itself alive.
    self_weak: Mutex<Weak<BrowserSession>>,
}

impl std::fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSession")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("healthy", &self.healthy.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl BrowserSession {
    pub fn new(
        id: String,
        context: Arc<dyn BrowserContext>,
        page: Arc<dyn Page>,
        profile: Option<String>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            id,
            profile,
            context,
            page: RwLock::new(Arc::clone(&page)),
            healthy: AtomicBool::new(true),
            handles: HandleRegistry::new(),
            listener: Mutex::new(None),
            last_snapshot_at: Mutex::new(DateTime::<Utc>::MIN_UTC),
            self_weak: Mutex::new(Weak::new()),
        });
        *session.self_weak.lock().unwrap() = Arc::downgrade(&session);
        session.arm_listener(page);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn page(&self) -> Arc<dyn Page> {
        Arc::clone(&self.page.read().unwrap())
    }

    pub fn context(&self) -> Arc<dyn BrowserContext> {
        Arc::clone(&self.context)
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub fn current_url(&self) -> String {
        self.page().url()
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }

    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    /// Swap in a replacement page and re-arm the crash listener.
    pub fn set_page(&self, page: Arc<dyn Page>) {
        *self.page.write().unwrap() = Arc::clone(&page);
        self.arm_listener(page);
    }

    /// Open a fresh page in the same context and make it active.
    pub async fn new_page(&self) -> Result<Arc<dyn Page>, AutomationError> {
        let page = self.context.new_page().await.map_err(|err| {
            AutomationError::SessionUnhealthy(format!("could not open page: {err}"))
        })?;
        self.set_page(Arc::clone(&page));
        Ok(page)
    }

    fn arm_listener(&self, page: Arc<dyn Page>) {
        let mut events = page.events();
        let weak = self.self_weak.lock().unwrap().clone();
        let handle = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                match event {
                    PageEvent::Crashed => {
                        tracing::warn!(session = %session.id, "page crashed");
                        session.mark_unhealthy();
                    }
                    PageEvent::Closed => {
                        tracing::debug!(session = %session.id, "page closed");
                        break;
                    }
                    PageEvent::DialogOpened { kind, message } => {
                        tracing::debug!(session = %session.id, kind = %kind, "dialog handled: {message}");
                    }
                }
            }
        });
        let mut guard = self.listener.lock().unwrap();
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
    }

    /// Capture `{url, cookies, localStorage}`. Local-storage capture
    /// tolerates `about:blank` and other storage-less documents.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, AutomationError> {
        let page = self.page();
        let url = page.url();
        let cookies = self
            .context
            .cookies()
            .await
            .map_err(|err| AutomationError::SessionUnhealthy(format!("cookie read: {err}")))?;

        let local_storage = match page.evaluate(LOCAL_STORAGE_DUMP).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(err) => {
                tracing::debug!(session = %self.id, "local storage capture skipped: {err}");
                HashMap::new()
            }
        };

        Ok(SessionSnapshot {
            session_id: self.id.clone(),
            url,
            cookies,
            local_storage,
            timestamp: self.next_snapshot_timestamp(),
        })
    }

    // Snapshot timestamps are monotonic per session even if the wall clock
    // steps backwards.
    fn next_snapshot_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_snapshot_at.lock().unwrap();
        let mut now = Utc::now();
        if now <= *last {
            now = *last + ChronoDuration::milliseconds(1);
        }
        *last = now;
        now
    }

    /// Re-establish a captured state: cookies, URL, then local storage.
    /// Opens a new page first if the active one is gone.
    pub async fn restore(&self, snapshot: &SessionSnapshot) -> Result<(), AutomationError> {
        let page = if self.page().is_closed() {
            self.new_page().await?
        } else {
            self.page()
        };

        self.context
            .clear_cookies()
            .await
            .map_err(|err| AutomationError::SessionUnhealthy(format!("cookie clear: {err}")))?;
        if !snapshot.cookies.is_empty() {
            self.context
                .add_cookies(snapshot.cookies.clone())
                .await
                .map_err(|err| {
                    AutomationError::SessionUnhealthy(format!("cookie restore: {err}"))
                })?;
        }

        if !snapshot.url.is_empty() && snapshot.url != "about:blank" {
            page.goto(&snapshot.url, LoadState::DomContentLoaded, RESTORE_NAV_TIMEOUT)
                .await
                .map_err(|err| {
                    AutomationError::NavigationInterrupted(format!(
                        "restore navigation to {}: {err}",
                        snapshot.url
                    ))
                })?;
        }

        if !snapshot.local_storage.is_empty() {
            let payload = serde_json::to_string(&snapshot.local_storage)
                .map_err(|err| AutomationError::Other(err.to_string()))?;
            let script = format!(
                r#"(() => {{
  try {{
    const data = {payload};
    for (const [key, value] of Object.entries(data)) {{
      localStorage.setItem(key, value);
    }}
    return true;
  }} catch (e) {{
    return false;
  }}
}})()"#
            );
            if let Err(err) = page.evaluate(&script).await {
                tracing::debug!(session = %self.id, "local storage restore skipped: {err}");
            }
        }

        Ok(())
    }

    /// Close the page and context, best-effort.
    pub async fn close(&self) {
        if let Some(listener) = self.listener.lock().unwrap().take() {
            listener.abort();
        }
        self.handles.clear();
        let page = self.page();
        if !page.is_closed() {
            if let Err(err) = page.close().await {
                tracing::debug!(session = %self.id, "page close: {err}");
            }
        }
        if let Err(err) = self.context.close().await {
            tracing::debug!(session = %self.id, "context close: {err}");
        }
    }
}
