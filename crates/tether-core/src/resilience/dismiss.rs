//! Popup Dismisser
//!
//! A per-action background watcher with two arms: a CSS-pattern sweep over
//! common consent/overlay/banner close buttons, and a native-dialog policy
//! that keeps `alert`/`confirm`/`prompt` from hanging the page.
//!
//! The engine starts a sweeper before the first attempt and stops it after
//! the action settles, so every action runs dismissal-protected.

use crate::driver::{DialogPolicy, Page};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Consent/overlay/banner close buttons seen across the common stacks.
pub const DEFAULT_DISMISS_PATTERNS: &[&str] = &[
    // Cookie / GDPR consent
    "#onetrust-accept-btn-handler",
    "button#accept-cookies",
    "button[id*='cookie-accept']",
    "button[class*='cookie-accept']",
    "[aria-label='Accept cookies']",
    "button[data-testid='cookie-banner-accept']",
    "#gdpr-consent-accept",
    ".cc-btn.cc-allow",
    // Generic modal / overlay close buttons
    "button[aria-label='Close']",
    "button[aria-label='Dismiss']",
    ".modal [class*='close']",
    ".modal-close",
    ".modal__close",
    ".overlay [class*='close']",
    ".popup [class*='close']",
    "[class*='banner'] [class*='close']",
    "[class*='banner'] [class*='dismiss']",
];

/// Sweep cadence while an action is in flight.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(3000);

/// Immutable dismissal configuration shared by all sessions.
#[derive(Clone)]
pub struct DismissRules {
    patterns: Vec<String>,
    interval: Duration,
    dialog_policy: DialogPolicy,
}

impl Default for DismissRules {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_DISMISS_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            interval: DEFAULT_SWEEP_INTERVAL,
            dialog_policy: DialogPolicy::AutoDismiss,
        }
    }
}

impl DismissRules {
    pub fn new(
        extra_patterns: Vec<String>,
        interval: Duration,
        dialog_policy: DialogPolicy,
    ) -> Self {
        let mut patterns: Vec<String> = DEFAULT_DISMISS_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();
        patterns.extend(extra_patterns);
        Self {
            patterns,
            interval,
            dialog_policy,
        }
    }
}

/// The watcher itself; cheap to clone via `Arc`.
pub struct PopupDismisser {
    rules: Arc<DismissRules>,
}

impl PopupDismisser {
    pub fn new(rules: Arc<DismissRules>) -> Self {
        Self { rules }
    }

    /// Arm the native-dialog listener and spawn the interval sweep.
    ///
    /// Dropping the returned guard aborts the sweep task; the engine holds it
    /// for exactly the span of one action.
    pub fn start(&self, page: Arc<dyn Page>) -> DismissGuard {
        page.set_dialog_policy(self.rules.dialog_policy);

        let rules = Arc::clone(&self.rules);
        let sweep_page = Arc::clone(&page);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rules.interval);
            // First tick fires immediately; the engine already swept, skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep(&sweep_page, &rules.patterns).await;
            }
        });

        DismissGuard { handle }
    }

    /// One-shot sweep, invoked by the engine at each retry start.
    pub async fn sweep_once(&self, page: &Arc<dyn Page>) -> bool {
        sweep(page, &self.rules.patterns).await
    }
}

/// Click the first visible match among the patterns. Best-effort: every
/// driver failure is ignored, a sweep must never fail an action.
async fn sweep(page: &Arc<dyn Page>, patterns: &[String]) -> bool {
    for pattern in patterns {
        let locator = page.locator(pattern);
        let present = matches!(locator.count().await, Ok(n) if n > 0);
        if !present {
            continue;
        }
        let first = locator.nth(0);
        if !matches!(first.is_visible().await, Ok(true)) {
            continue;
        }
        match first.click().await {
            Ok(()) => {
                tracing::debug!(pattern = %pattern, "dismissed overlay");
                return true;
            }
            Err(err) => {
                tracing::debug!(pattern = %pattern, "dismiss click missed: {err}");
            }
        }
    }
    false
}

/// Aborts the background sweep on drop.
pub struct DismissGuard {
    handle: JoinHandle<()>,
}

impl Drop for DismissGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
