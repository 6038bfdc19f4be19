//! Health Monitor
//!
//! Probes every tracked session on a timer by racing a `document.readyState`
//! evaluate against a timeout. A run of consecutive failures marks the
//! session unhealthy and notifies the pool, which owns recovery.

use crate::session::BrowserSession;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub max_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            max_failures: 3,
        }
    }
}

struct Tracked {
    session: Arc<BrowserSession>,
    failures: u32,
}

pub struct HealthMonitor {
    config: HealthConfig,
    tracked: Arc<Mutex<HashMap<String, Tracked>>>,
    notify: mpsc::UnboundedSender<String>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Returns the monitor and the channel on which unhealthy session ids
    /// are delivered.
    pub fn new(config: HealthConfig) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (notify, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                tracked: Arc::new(Mutex::new(HashMap::new())),
                notify,
                task: Mutex::new(None),
            },
            rx,
        )
    }

    pub fn track(&self, session: Arc<BrowserSession>) {
        self.tracked.lock().unwrap().insert(
            session.id().to_string(),
            Tracked {
                session,
                failures: 0,
            },
        );
    }

    pub fn untrack(&self, session_id: &str) {
        self.tracked.lock().unwrap().remove(session_id);
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().unwrap().len()
    }

    pub fn start(&self) {
        let mut guard = self.task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let tracked = Arc::clone(&self.tracked);
        let notify = self.notify.clone();
        let config = self.config.clone();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                probe_all(&tracked, &notify, &config).await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn probe_all(
    tracked: &Arc<Mutex<HashMap<String, Tracked>>>,
    notify: &mpsc::UnboundedSender<String>,
    config: &HealthConfig,
) {
    let sessions: Vec<(String, Arc<BrowserSession>)> = {
        let guard = tracked.lock().unwrap();
        guard
            .iter()
            .filter(|(_, t)| t.session.healthy())
            .map(|(id, t)| (id.clone(), Arc::clone(&t.session)))
            .collect()
    };

    for (id, session) in sessions {
        let alive = probe(&session, config.probe_timeout).await;
        let mut guard = tracked.lock().unwrap();
        let Some(entry) = guard.get_mut(&id) else {
            continue;
        };
        if alive {
            entry.failures = 0;
            continue;
        }
        entry.failures += 1;
        tracing::debug!(
            session = %id,
            failures = entry.failures,
            "health probe failed"
        );
        if entry.failures >= config.max_failures {
            entry.failures = 0;
            entry.session.mark_unhealthy();
            tracing::warn!(session = %id, "session marked unhealthy");
            let _ = notify.send(id.clone());
        }
    }
}

async fn probe(session: &Arc<BrowserSession>, timeout: Duration) -> bool {
    let page = session.page();
    match tokio::time::timeout(timeout, page.evaluate("document.readyState")).await {
        Ok(Ok(value)) => matches!(
            value.as_str(),
            Some("loading") | Some("interactive") | Some("complete")
        ),
        Ok(Err(_)) | Err(_) => false,
    }
}
