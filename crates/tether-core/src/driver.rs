//! Driver Capability Traits
//!
//! The library that actually speaks to a browser is out of scope for this
//! crate. Everything the runtime needs from it is expressed here as a small
//! capability set: contexts, pages, locators, cookies, evaluation, and
//! crash/disconnect events.
//!
//! Implementations:
//! - Production: an adapter over a real driver (CDP, WebDriver, ...)
//! - Tests: the in-memory driver in [`crate::mock`]

use crate::error::AutomationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Errors raised by driver capabilities.
///
/// These are mapped into the engine taxonomy at the action layer; the
/// blanket [`From`] below covers the cases whose meaning does not depend on
/// which action was running.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Script execution error: {0}")]
    Script(String),

    #[error("Element detached: {0}")]
    Detached(String),

    #[error("Target closed")]
    Closed,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err.to_string())
    }
}

impl From<DriverError> for AutomationError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Timeout(msg) => AutomationError::TimeoutExceeded(msg),
            DriverError::Detached(msg) => AutomationError::StaleElement(msg),
            DriverError::Closed => AutomationError::SessionUnhealthy("target closed".into()),
            other => AutomationError::Other(other.to_string()),
        }
    }
}

/// Element wait states accepted by [`Locator::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitState {
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    /// Absence states probe a single strategy; waiting for every fallback to
    /// disappear is meaningless.
    pub fn is_absence(&self) -> bool {
        matches!(self, WaitState::Hidden | WaitState::Detached)
    }
}

/// Page load states accepted by navigation and load waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

/// How the page answers native `alert`/`confirm`/`prompt` dialogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogPolicy {
    /// Dismiss every dialog so the page never hangs on one.
    #[default]
    AutoDismiss,
    AutoAccept,
    Ignore,
}

/// Events broadcast by a page.
#[derive(Debug, Clone)]
pub enum PageEvent {
    Crashed,
    Closed,
    DialogOpened { kind: String, message: String },
}

/// Events broadcast by a browser handle.
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

/// A lazy reference to zero or more elements matching one strategy.
#[async_trait]
pub trait Locator: Send + Sync {
    /// Number of elements currently matching.
    async fn count(&self) -> Result<usize, DriverError>;

    /// Block until the first match reaches `state` or the timeout elapses.
    async fn wait_for(&self, state: WaitState, timeout: Duration) -> Result<(), DriverError>;

    async fn click(&self) -> Result<(), DriverError>;

    /// Programmatic value set (clears first).
    async fn fill(&self, text: &str) -> Result<(), DriverError>;

    /// Per-keystroke typing with a delay between keys.
    async fn type_text(&self, text: &str, delay: Duration) -> Result<(), DriverError>;

    async fn press(&self, key: &str) -> Result<(), DriverError>;

    async fn set_checked(&self, checked: bool) -> Result<(), DriverError>;

    async fn select_option(&self, value: &str) -> Result<(), DriverError>;

    async fn hover(&self) -> Result<(), DriverError>;

    async fn drag_to(&self, target: Arc<dyn Locator>) -> Result<(), DriverError> {
        let _ = target;
        Err(DriverError::NotSupported("drag_to".into()))
    }

    async fn scroll_into_view(&self) -> Result<(), DriverError>;

    async fn text_content(&self) -> Result<Option<String>, DriverError>;

    async fn inner_html(&self) -> Result<String, DriverError>;

    /// Current value of an input/textarea/select.
    async fn input_value(&self) -> Result<String, DriverError>;

    async fn get_attribute(&self, name: &str) -> Result<Option<String>, DriverError>;

    async fn is_visible(&self) -> Result<bool, DriverError>;

    /// Run a script against the first matching element. The element is bound
    /// as `el` in the script scope.
    async fn evaluate(&self, script: &str) -> Result<Value, DriverError>;

    /// Narrow to the n-th match (0-based).
    fn nth(&self, index: usize) -> Arc<dyn Locator>;
}

/// One page inside a browser context.
#[async_trait]
pub trait Page: Send + Sync {
    /// Last committed URL. Cheap; safe to call between retry attempts.
    fn url(&self) -> String;

    async fn goto(
        &self,
        url: &str,
        wait_until: LoadState,
        timeout: Duration,
    ) -> Result<Option<u16>, DriverError>;

    async fn reload(&self, timeout: Duration) -> Result<Option<u16>, DriverError>;

    async fn go_back(&self, timeout: Duration) -> Result<Option<u16>, DriverError>;

    async fn go_forward(&self, timeout: Duration) -> Result<Option<u16>, DriverError>;

    async fn title(&self) -> Result<String, DriverError>;

    /// Run a script in the page. The result must be JSON-serialisable.
    async fn evaluate(&self, script: &str) -> Result<Value, DriverError>;

    fn locator(&self, css: &str) -> Arc<dyn Locator>;

    fn by_role(&self, role: &str, name: Option<&str>) -> Arc<dyn Locator>;

    fn by_label(&self, text: &str) -> Arc<dyn Locator>;

    fn by_text(&self, text: &str, exact: bool) -> Arc<dyn Locator>;

    fn by_test_id(&self, id: &str) -> Arc<dyn Locator>;

    fn by_xpath(&self, expression: &str) -> Arc<dyn Locator>;

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, DriverError>;

    async fn pdf(&self) -> Result<Vec<u8>, DriverError> {
        Err(DriverError::NotSupported("pdf".into()))
    }

    /// Wait until the URL contains `fragment`.
    async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn wait_for_load_state(
        &self,
        state: LoadState,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    fn set_dialog_policy(&self, policy: DialogPolicy);

    /// Subscribe to crash/close/dialog events.
    fn events(&self) -> broadcast::Receiver<PageEvent>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), DriverError>;
}

/// An isolated browser context: its own cookie jar and storage.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>, DriverError>;

    async fn cookies(&self) -> Result<Vec<Cookie>, DriverError>;

    async fn add_cookies(&self, cookies: Vec<Cookie>) -> Result<(), DriverError>;

    async fn clear_cookies(&self) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

/// A running browser that can mint isolated contexts.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>, DriverError>;

    /// Subscribe to disconnect events.
    fn events(&self) -> broadcast::Receiver<BrowserEvent>;

    async fn close(&self) -> Result<(), DriverError>;
}

/// Entry point: launches (or connects to) a browser.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Browser>, DriverError>;
}
