//! Action Engine
//!
//! Runs user-supplied action bodies inside the precondition→execute→verify
//! envelope: per-attempt budgets, retries with exponential back-off, a
//! navigation guard, duplicate-click suppression state, selector rotation on
//! `TargetNotFound`, popup-dismissal sweeps, and trace/screenshot emission.

use crate::artifacts::ArtifactStore;
use crate::driver::Page;
use crate::error::{AutomationError, StructuredError};
use crate::resilience::PopupDismisser;
use crate::resolve::ResolutionMeta;
use crate::selector::SelectorStrategy;
use crate::session::BrowserSession;
use crate::trace::{ActionTrace, AssertionRecord, TraceEntry, WaitRecord};
use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Timeout tiers for per-attempt budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Timeout {
    Short,
    #[default]
    Medium,
    Long,
    #[serde(untagged)]
    Millis(u64),
}

impl Timeout {
    pub fn duration(&self) -> Duration {
        match self {
            Timeout::Short => Duration::from_secs(5),
            Timeout::Medium => Duration::from_secs(15),
            Timeout::Long => Duration::from_secs(45),
            Timeout::Millis(ms) => Duration::from_millis(*ms),
        }
    }
}

/// Async predicate evaluated against the in-flight invocation.
pub type Predicate =
    Arc<dyn Fn(Arc<Invocation>) -> BoxFuture<'static, Result<bool, AutomationError>> + Send + Sync>;

/// Options accepted by [`execute_action`].
#[derive(Clone, Default)]
pub struct ActionOptions {
    pub timeout: Timeout,
    pub retries: Option<u32>,
    pub screenshot_on_failure: Option<bool>,
    pub precondition: Option<Predicate>,
    pub postcondition: Option<Predicate>,
    /// Trace label for the selector this action targets.
    pub selector: Option<String>,
    /// Internal: rotated on `TargetNotFound` so the next attempt leads with a
    /// different strategy. Shared with the body, which re-reads the order at
    /// each resolution.
    pub selector_strategies: Option<Arc<Mutex<Vec<SelectorStrategy>>>>,
}

impl ActionOptions {
    pub const DEFAULT_RETRIES: u32 = 3;

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_selector(mut self, key: impl Into<String>) -> Self {
        self.selector = Some(key.into());
        self
    }

    pub fn with_precondition(mut self, predicate: Predicate) -> Self {
        self.precondition = Some(predicate);
        self
    }

    pub fn with_postcondition(mut self, predicate: Predicate) -> Self {
        self.postcondition = Some(predicate);
        self
    }

    pub fn with_strategies(mut self, strategies: Arc<Mutex<Vec<SelectorStrategy>>>) -> Self {
        self.selector_strategies = Some(strategies);
        self
    }

    fn retries(&self) -> u32 {
        self.retries.unwrap_or(Self::DEFAULT_RETRIES)
    }

    fn screenshot_on_failure(&self) -> bool {
        self.screenshot_on_failure.unwrap_or(true)
    }
}

/// Outcome of one action invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult<T> {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_error: Option<StructuredError>,
    /// Attempts performed beyond the first.
    pub retries: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

/// Everything an action needs from its session: the page, the dismisser,
/// the trace sink, and the artifact store for failure screenshots.
#[derive(Clone)]
pub struct ActionCx {
    pub session: Arc<BrowserSession>,
    pub dismisser: Arc<PopupDismisser>,
    pub trace: Arc<ActionTrace>,
    pub artifacts: Option<Arc<ArtifactStore>>,
}

#[derive(Default)]
struct RetryState {
    clicks: HashMap<String, Instant>,
}

#[derive(Default)]
struct TraceMeta {
    selector_resolved: Option<ResolutionMeta>,
    events: Vec<String>,
    waits: Vec<WaitRecord>,
    assertions: Vec<AssertionRecord>,
}

/// Per-invocation state handed to the body. Retry state survives across
/// attempts of one action; trace metadata is reset per call.
pub struct Invocation {
    session: Arc<BrowserSession>,
    budget: Duration,
    retry: Mutex<RetryState>,
    meta: Mutex<TraceMeta>,
}

impl Invocation {
    pub fn page(&self) -> Arc<dyn Page> {
        self.session.page()
    }

    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    /// Per-attempt budget; bodies pass slices of it into driver waits.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn note_resolution(&self, meta: ResolutionMeta) {
        self.meta.lock().unwrap().selector_resolved = Some(meta);
    }

    pub fn note_event(&self, name: impl Into<String>) {
        self.meta.lock().unwrap().events.push(name.into());
    }

    pub fn note_wait(&self, kind: impl Into<String>, waited_ms: u64) {
        self.meta.lock().unwrap().waits.push(WaitRecord {
            kind: kind.into(),
            waited_ms,
        });
    }

    pub fn note_assertion(&self, name: impl Into<String>, passed: bool) {
        self.meta.lock().unwrap().assertions.push(AssertionRecord {
            name: name.into(),
            passed,
        });
    }

    /// Duplicate-click guard: true if `key` was clicked within `window`.
    pub fn recently_clicked(&self, key: &str, window: Duration) -> bool {
        let retry = self.retry.lock().unwrap();
        retry
            .clicks
            .get(key)
            .is_some_and(|at| at.elapsed() < window)
    }

    pub fn record_click(&self, key: &str) {
        self.retry
            .lock()
            .unwrap()
            .clicks
            .insert(key.to_string(), Instant::now());
    }

    fn take_meta(&self) -> TraceMeta {
        std::mem::take(&mut *self.meta.lock().unwrap())
    }
}

/// Run `body` inside the retry/verify envelope and record one trace entry.
pub async fn execute_action<T, F>(
    cx: &ActionCx,
    name: &str,
    options: ActionOptions,
    body: F,
) -> ActionResult<T>
where
    T: Send + 'static,
    F: Fn(Arc<Invocation>) -> BoxFuture<'static, Result<T, AutomationError>>,
{
    let started = Instant::now();
    let budget = options.timeout.duration();
    let start_url = cx.session.page().url();
    let max_attempts = options.retries() + 1;

    let invocation = Arc::new(Invocation {
        session: Arc::clone(&cx.session),
        budget,
        retry: Mutex::new(RetryState::default()),
        meta: Mutex::new(TraceMeta::default()),
    });

    // Dismissal protection spans the whole action; the guard stops the
    // sweeper when this function returns on any path.
    let _dismiss_guard = cx.dismisser.start(cx.session.page());

    let mut last_error: Option<AutomationError> = None;

    for attempt in 0..max_attempts {
        if attempt >= 1 {
            let current = cx.session.page().url();
            if current != start_url {
                let err = AutomationError::NavigationInterrupted(format!(
                    "url changed from {start_url} to {current}"
                ));
                // Terminal: report attempts actually performed, not the
                // configured maximum.
                return fail(cx, name, &options, &invocation, err, attempt - 1, started).await;
            }
        }

        cx.dismisser.sweep_once(&cx.session.page()).await;

        if let Some(precondition) = &options.precondition {
            match precondition(Arc::clone(&invocation)).await {
                Ok(true) => {}
                Ok(false) => {
                    last_error = Some(AutomationError::AssertionFailed(
                        "precondition failed".into(),
                    ));
                    backoff_if_remaining(attempt, max_attempts).await;
                    continue;
                }
                Err(err) => {
                    if !err.retryable() {
                        return fail(cx, name, &options, &invocation, err, attempt, started).await;
                    }
                    last_error = Some(err);
                    backoff_if_remaining(attempt, max_attempts).await;
                    continue;
                }
            }
        }

        let outcome = tokio::time::timeout(budget, body(Arc::clone(&invocation))).await;
        match outcome {
            Err(_) => {
                last_error = Some(AutomationError::TimeoutExceeded(format!(
                    "attempt budget of {}ms elapsed",
                    budget.as_millis()
                )));
            }
            Ok(Err(err)) => {
                if matches!(err, AutomationError::TargetNotFound(_)) {
                    rotate_strategies(&options);
                }
                if !err.retryable() {
                    return fail(cx, name, &options, &invocation, err, attempt, started).await;
                }
                last_error = Some(err);
            }
            Ok(Ok(data)) => {
                let verified = match &options.postcondition {
                    None => Ok(true),
                    Some(postcondition) => postcondition(Arc::clone(&invocation)).await,
                };
                match verified {
                    Ok(true) => {
                        return succeed(cx, name, &options, &invocation, data, attempt, started);
                    }
                    Ok(false) => {
                        last_error = Some(AutomationError::AssertionFailed(
                            "postcondition failed".into(),
                        ));
                    }
                    Err(err) => {
                        if !err.retryable() {
                            return fail(cx, name, &options, &invocation, err, attempt, started)
                                .await;
                        }
                        last_error = Some(err);
                    }
                }
            }
        }

        backoff_if_remaining(attempt, max_attempts).await;
    }

    let err = last_error
        .unwrap_or_else(|| AutomationError::Other("action failed with no recorded error".into()));
    fail(cx, name, &options, &invocation, err, max_attempts - 1, started).await
}

fn rotate_strategies(options: &ActionOptions) {
    if let Some(strategies) = &options.selector_strategies {
        let mut chain = strategies.lock().unwrap();
        if chain.len() > 1 {
            let head = chain.remove(0);
            tracing::debug!(strategy = %head.describe(), "rotating selector chain");
            chain.push(head);
        }
    }
}

async fn backoff_if_remaining(attempt: u32, max_attempts: u32) {
    if attempt + 1 >= max_attempts {
        return;
    }
    let base = 100u64.saturating_mul(1u64 << attempt.min(16));
    let delay = base.min(2_000) + jitter_ms();
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

// Jitter from the subsecond clock; enough spread to de-synchronise retries
// without pulling in an RNG.
fn jitter_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) % 500)
        .unwrap_or(250)
}

fn succeed<T>(
    cx: &ActionCx,
    name: &str,
    options: &ActionOptions,
    invocation: &Invocation,
    data: T,
    attempt: u32,
    started: Instant,
) -> ActionResult<T> {
    let duration_ms = started.elapsed().as_millis() as u64;
    let meta = invocation.take_meta();
    cx.trace.record(
        cx.session.id(),
        TraceEntry {
            action: name.to_string(),
            selector: options.selector.clone(),
            timestamp: Utc::now(),
            duration_ms,
            ok: true,
            error: None,
            retries: attempt,
            selector_resolved: meta.selector_resolved,
            events_dispatched: some_if_nonempty(meta.events),
            waits_performed: some_if_nonempty(meta.waits),
            assertions_checked: some_if_nonempty(meta.assertions),
        },
    );

    ActionResult {
        ok: true,
        data: Some(data),
        error: None,
        structured_error: None,
        retries: attempt,
        duration_ms,
        screenshot: None,
    }
}

async fn fail<T>(
    cx: &ActionCx,
    name: &str,
    options: &ActionOptions,
    invocation: &Invocation,
    err: AutomationError,
    retries: u32,
    started: Instant,
) -> ActionResult<T> {
    let screenshot = if options.screenshot_on_failure() {
        capture_failure_screenshot(cx, name).await
    } else {
        None
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let message = err.to_string();
    let meta = invocation.take_meta();
    cx.trace.record(
        cx.session.id(),
        TraceEntry {
            action: name.to_string(),
            selector: options.selector.clone(),
            timestamp: Utc::now(),
            duration_ms,
            ok: false,
            error: Some(message.clone()),
            retries,
            selector_resolved: meta.selector_resolved,
            events_dispatched: some_if_nonempty(meta.events),
            waits_performed: some_if_nonempty(meta.waits),
            assertions_checked: some_if_nonempty(meta.assertions),
        },
    );
    tracing::warn!(action = name, session = %cx.session.id(), "action failed: {message}");

    ActionResult {
        ok: false,
        data: None,
        error: Some(message),
        structured_error: err.structured(),
        retries,
        duration_ms,
        screenshot,
    }
}

async fn capture_failure_screenshot(cx: &ActionCx, name: &str) -> Option<PathBuf> {
    let artifacts = cx.artifacts.as_ref()?;
    let page = cx.session.page();
    let shot = tokio::time::timeout(Duration::from_secs(3), page.screenshot(false)).await;
    match shot {
        Ok(Ok(bytes)) => match artifacts
            .write_screenshot(cx.session.id(), name, Some("failure"), &bytes)
            .await
        {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::debug!("failure screenshot not persisted: {err}");
                None
            }
        },
        Ok(Err(err)) => {
            tracing::debug!("failure screenshot skipped: {err}");
            None
        }
        Err(_) => {
            tracing::debug!("failure screenshot timed out");
            None
        }
    }
}

fn some_if_nonempty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
