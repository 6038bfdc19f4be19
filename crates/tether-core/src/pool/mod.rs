//! Browser Session Pool
//!
//! Owns the shared browser handle and every live session. Launch is lazy and
//! serialised; admission is capped; profile-bound sessions are snapshotted to
//! disk on release; unhealthy sessions are replaced with a fresh context
//! under the same session id so external references stay valid.

mod health;

pub use health::{HealthConfig, HealthMonitor};

use crate::driver::{Browser, BrowserEvent, Driver, LoadState};
use crate::error::AutomationError;
use crate::session::{BrowserSession, SessionSnapshot};
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const DEFAULT_MAX_CONTEXTS: usize = 8;
pub const PROFILE_SNAPSHOT_FILE: &str = "session-snapshot.json";

const ACQUIRE_NAV_TIMEOUT: Duration = Duration::from_secs(30);

fn profile_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").unwrap())
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_contexts: usize,
    pub profiles_dir: PathBuf,
    pub health: HealthConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: DEFAULT_MAX_CONTEXTS,
            profiles_dir: PathBuf::from("./profiles"),
            health: HealthConfig::default(),
        }
    }
}

/// What `acquire` accepts.
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    pub profile: Option<String>,
    pub url: Option<String>,
}

pub struct SessionPool {
    driver: Arc<dyn Driver>,
    config: PoolConfig,
    // Serialised lazy launch: whoever holds this lock launches; everyone
    // else awaits and finds the handle already present.
    browser: tokio::sync::Mutex<Option<Arc<dyn Browser>>>,
    sessions: Mutex<HashMap<String, Arc<BrowserSession>>>,
    health: HealthMonitor,
    running: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
    // Set once in `new`; background tasks hold weak handles so a dropped
    // pool tears its watchers down instead of leaking them.
    self_weak: Mutex<Weak<SessionPool>>,
}

impl SessionPool {
    pub fn new(driver: Arc<dyn Driver>, config: PoolConfig) -> Arc<Self> {
        let (health, mut unhealthy_rx) = HealthMonitor::new(config.health.clone());
        health.start();

        let pool = Arc::new(Self {
            driver,
            config,
            browser: tokio::sync::Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
            health,
            running: AtomicBool::new(true),
            background: Mutex::new(Vec::new()),
            self_weak: Mutex::new(Weak::new()),
        });
        *pool.self_weak.lock().unwrap() = Arc::downgrade(&pool);

        let weak: Weak<SessionPool> = Arc::downgrade(&pool);
        let recovery = tokio::spawn(async move {
            while let Some(session_id) = unhealthy_rx.recv().await {
                let Some(pool) = weak.upgrade() else {
                    break;
                };
                pool.recover(&session_id).await;
            }
        });
        pool.background.lock().unwrap().push(recovery);

        pool
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<BrowserSession>> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }

    /// Create a session: admission check, lazy launch, optional profile
    /// restore, then optional navigation, in that order.
    pub async fn acquire(
        &self,
        options: AcquireOptions,
    ) -> Result<Arc<BrowserSession>, AutomationError> {
        if !self.is_running() {
            return Err(AutomationError::SessionUnhealthy(
                "pool is shut down".into(),
            ));
        }
        if self.active_sessions() >= self.config.max_contexts {
            return Err(AutomationError::Other(format!(
                "pool limit reached ({} contexts)",
                self.config.max_contexts
            )));
        }

        let profile = match &options.profile {
            Some(name) => {
                if !profile_name_pattern().is_match(name) {
                    return Err(AutomationError::Other(format!(
                        "invalid profile name: {name}"
                    )));
                }
                Some(name.clone())
            }
            None => None,
        };

        let browser = self.ensure_browser().await?;
        let context = browser
            .new_context()
            .await
            .map_err(|err| AutomationError::SessionUnhealthy(format!("context launch: {err}")))?;
        let page = context
            .new_page()
            .await
            .map_err(|err| AutomationError::SessionUnhealthy(format!("page open: {err}")))?;

        let session_id = Uuid::new_v4().simple().to_string();
        let session = BrowserSession::new(
            session_id.clone(),
            context,
            Arc::clone(&page),
            profile.clone(),
        );

        if let Some(name) = &profile {
            if let Some(snapshot) = self.load_profile_snapshot(name).await {
                if let Err(err) = session.restore(&snapshot).await {
                    tracing::warn!(profile = %name, "profile restore failed: {err}");
                }
            }
        }

        if let Some(url) = &options.url {
            page.goto(url, LoadState::Load, ACQUIRE_NAV_TIMEOUT)
                .await
                .map_err(|err| {
                    AutomationError::NavigationInterrupted(format!("open {url}: {err}"))
                })?;
        }

        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), Arc::clone(&session));
        self.health.track(Arc::clone(&session));
        tracing::info!(session = %session_id, profile = ?profile, "session acquired");
        Ok(session)
    }

    /// Close a session. Profile-bound sessions are snapshotted to the
    /// profile directory first; snapshot failures never block the close.
    pub async fn release(&self, session_id: &str) -> Result<(), AutomationError> {
        let session = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.remove(session_id)
        }
        .ok_or_else(|| {
            AutomationError::StaleElement(format!("unknown session: {session_id}"))
        })?;
        self.health.untrack(session_id);

        self.persist_profile(&session).await;
        session.close().await;
        tracing::info!(session = %session_id, "session released");
        Ok(())
    }

    /// Snapshot the current state of a live session.
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, AutomationError> {
        let session = self.get_session(session_id).ok_or_else(|| {
            AutomationError::StaleElement(format!("unknown session: {session_id}"))
        })?;
        session.snapshot().await
    }

    /// Restore a live session from its profile's stored snapshot.
    pub async fn restore_from_profile(&self, session_id: &str) -> Result<(), AutomationError> {
        let session = self.get_session(session_id).ok_or_else(|| {
            AutomationError::StaleElement(format!("unknown session: {session_id}"))
        })?;
        let Some(profile) = session.profile().map(str::to_string) else {
            return Err(AutomationError::Other(
                "session has no profile to restore from".into(),
            ));
        };
        let snapshot = self.load_profile_snapshot(&profile).await.ok_or_else(|| {
            AutomationError::Other(format!("no stored snapshot for profile {profile}"))
        })?;
        session.restore(&snapshot).await
    }

    fn ensure_browser(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Browser>, AutomationError>> + Send + '_>> {
        Box::pin(async move {
            let mut guard = self.browser.lock().await;
            if let Some(browser) = guard.as_ref() {
                return Ok(Arc::clone(browser));
            }

            tracing::info!("launching browser");
            let browser = self.driver.launch().await.map_err(|err| {
                AutomationError::SessionUnhealthy(format!("browser launch: {err}"))
            })?;
            *guard = Some(Arc::clone(&browser));

            // Broadcast disconnects to every session: each one is recovered
            // against a freshly launched browser.
            let mut events = browser.events();
            let weak = self.weak_self();
            let watcher = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    let BrowserEvent::Disconnected = event;
                    let Some(pool) = weak.upgrade() else {
                        break;
                    };
                    pool.on_disconnected().await;
                    break;
                }
            });
            self.background.lock().unwrap().push(watcher);

            Ok(Arc::clone(&browser))
        })
    }

    fn weak_self(&self) -> Weak<SessionPool> {
        self.self_weak.lock().unwrap().clone()
    }

    async fn on_disconnected(&self) {
        if !self.is_running() {
            return;
        }
        tracing::warn!("browser disconnected; recovering all sessions");
        *self.browser.lock().await = None;
        for session_id in self.session_ids() {
            if let Some(session) = self.get_session(&session_id) {
                session.mark_unhealthy();
            }
            self.recover(&session_id).await;
        }
    }

    /// Preserve-id auto-recovery: replace the broken context with a fresh
    /// one while keeping the session id stable.
    pub async fn recover(&self, session_id: &str) {
        if !self.is_running() {
            return;
        }
        let Some(old) = self.get_session(session_id) else {
            return;
        };
        tracing::warn!(session = %session_id, "recovering session");

        // Best snapshot we can get: live state first, then the profile's
        // stored snapshot.
        let mut snapshot = old.snapshot().await.ok();
        if snapshot.is_none() {
            if let Some(profile) = old.profile() {
                snapshot = self.load_profile_snapshot(profile).await;
            }
        }

        self.health.untrack(session_id);
        self.sessions.lock().unwrap().remove(session_id);
        old.close().await;

        let replacement = async {
            let browser = self.ensure_browser().await?;
            let context = browser.new_context().await.map_err(|err| {
                AutomationError::SessionUnhealthy(format!("recovery context: {err}"))
            })?;
            let page = context.new_page().await.map_err(|err| {
                AutomationError::SessionUnhealthy(format!("recovery page: {err}"))
            })?;
            Ok::<_, AutomationError>(BrowserSession::new(
                session_id.to_string(),
                context,
                page,
                old.profile().map(str::to_string),
            ))
        }
        .await;

        let session = match replacement {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(session = %session_id, "recovery failed: {err}");
                return;
            }
        };

        if let Some(snapshot) = snapshot {
            if let Err(err) = session.restore(&snapshot).await {
                tracing::warn!(session = %session_id, "recovery restore failed: {err}");
            }
        }

        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), Arc::clone(&session));
        self.health.track(session);
        tracing::info!(session = %session_id, "session recovered");
    }

    /// Close every session concurrently, close the browser, reset state.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.health.stop();
        for task in self.background.lock().unwrap().drain(..) {
            task.abort();
        }

        let sessions: Vec<Arc<BrowserSession>> = {
            let mut guard = self.sessions.lock().unwrap();
            guard.drain().map(|(_, s)| s).collect()
        };
        // All-settled: every close runs to completion regardless of siblings.
        futures::future::join_all(sessions.iter().map(|session| async {
            self.health.untrack(session.id());
            self.persist_profile(session).await;
            session.close().await;
        }))
        .await;

        let browser = self.browser.lock().await.take();
        if let Some(browser) = browser {
            if let Err(err) = browser.close().await {
                tracing::debug!("browser close: {err}");
            }
        }
        tracing::info!("pool shut down");
    }

    async fn persist_profile(&self, session: &Arc<BrowserSession>) {
        let Some(profile) = session.profile().map(str::to_string) else {
            return;
        };
        let snapshot = match session.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(profile = %profile, "profile snapshot failed: {err}");
                return;
            }
        };
        if let Err(err) = self.write_profile_snapshot(&profile, &snapshot).await {
            tracing::warn!(profile = %profile, "profile persist failed: {err}");
        }
    }

    fn profile_snapshot_path(&self, profile: &str) -> PathBuf {
        self.config
            .profiles_dir
            .join(profile)
            .join(PROFILE_SNAPSHOT_FILE)
    }

    async fn load_profile_snapshot(&self, profile: &str) -> Option<SessionSnapshot> {
        let path = self.profile_snapshot_path(profile);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(path = %path.display(), "corrupt profile snapshot: {err}");
                None
            }
        }
    }

    async fn write_profile_snapshot(
        &self,
        profile: &str,
        snapshot: &SessionSnapshot,
    ) -> Result<(), AutomationError> {
        let dir = self.config.profiles_dir.join(profile);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| AutomationError::Other(format!("profile dir: {err}")))?;
        let payload = serde_json::to_string_pretty(snapshot)
            .map_err(|err| AutomationError::Other(err.to_string()))?;
        tokio::fs::write(dir.join(PROFILE_SNAPSHOT_FILE), payload)
            .await
            .map_err(|err| AutomationError::Other(format!("profile write: {err}")))
    }
}
