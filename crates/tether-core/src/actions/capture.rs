//! Page-level capture and state primitives: screenshots, PDFs, window
//! scrolling, and the lightweight page-state probe.

use crate::engine::{execute_action, ActionCx, ActionOptions, ActionResult};
use crate::error::AutomationError;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub ready_state: String,
    pub is_loading: bool,
}

pub async fn screenshot(
    cx: &ActionCx,
    label: Option<&str>,
    full_page: bool,
    options: ActionOptions,
) -> ActionResult<PathBuf> {
    let artifacts = cx.artifacts.clone();
    let label = label.map(str::to_string);
    let session_id = cx.session.id().to_string();
    execute_action(cx, "screenshot", options, move |inv| {
        let artifacts = artifacts.clone();
        let label = label.clone();
        let session_id = session_id.clone();
        async move {
            let store = artifacts.ok_or_else(|| {
                AutomationError::Other("no artifact store configured".into())
            })?;
            let bytes = inv
                .page()
                .screenshot(full_page)
                .await
                .map_err(AutomationError::from)?;
            store
                .write_screenshot(&session_id, "screenshot", label.as_deref(), &bytes)
                .await
                .map_err(|err| AutomationError::Other(err.to_string()))
        }
        .boxed()
    })
    .await
}

pub async fn pdf(
    cx: &ActionCx,
    label: Option<&str>,
    options: ActionOptions,
) -> ActionResult<PathBuf> {
    let artifacts = cx.artifacts.clone();
    let label = label.map(str::to_string);
    let session_id = cx.session.id().to_string();
    execute_action(cx, "pdf", options, move |inv| {
        let artifacts = artifacts.clone();
        let label = label.clone();
        let session_id = session_id.clone();
        async move {
            let store = artifacts.ok_or_else(|| {
                AutomationError::Other("no artifact store configured".into())
            })?;
            let bytes = inv.page().pdf().await.map_err(AutomationError::from)?;
            store
                .write_pdf(&session_id, "pdf", label.as_deref(), &bytes)
                .await
                .map_err(|err| AutomationError::Other(err.to_string()))
        }
        .boxed()
    })
    .await
}

/// Scroll the window. `amount` is in pixels; edge directions (`top`,
/// `bottom`) ignore it.
pub async fn scroll(
    cx: &ActionCx,
    direction: ScrollDirection,
    amount: Option<i64>,
    options: ActionOptions,
) -> ActionResult<()> {
    execute_action(cx, "scroll", options, move |inv| {
        async move {
            let step = amount.unwrap_or(600);
            let script = match direction {
                ScrollDirection::Up => format!("window.scrollBy(0, -{step})"),
                ScrollDirection::Down => format!("window.scrollBy(0, {step})"),
                ScrollDirection::Left => format!("window.scrollBy(-{step}, 0)"),
                ScrollDirection::Right => format!("window.scrollBy({step}, 0)"),
                ScrollDirection::Top => "window.scrollTo(0, 0)".to_string(),
                ScrollDirection::Bottom => {
                    "window.scrollTo(0, document.body ? document.body.scrollHeight : 0)"
                        .to_string()
                }
            };
            inv.page()
                .evaluate(&script)
                .await
                .map_err(AutomationError::from)?;
            inv.note_event("scroll");
            Ok(())
        }
        .boxed()
    })
    .await
}

pub async fn get_page_state(cx: &ActionCx, options: ActionOptions) -> ActionResult<PageState> {
    execute_action(cx, "get_page_state", options, move |inv| {
        async move {
            let page = inv.page();
            let ready_state = page
                .evaluate("document.readyState")
                .await
                .map_err(AutomationError::from)?
                .as_str()
                .unwrap_or("unknown")
                .to_string();
            let title = page.title().await.map_err(AutomationError::from)?;
            Ok(PageState {
                url: page.url(),
                title,
                is_loading: ready_state != "complete",
                ready_state,
            })
        }
        .boxed()
    })
    .await
}

/// Evaluate a caller-supplied script in the page and return its JSON value.
pub async fn evaluate(
    cx: &ActionCx,
    script: &str,
    options: ActionOptions,
) -> ActionResult<serde_json::Value> {
    let script: Arc<str> = script.into();
    execute_action(cx, "evaluate", options, move |inv| {
        let script = Arc::clone(&script);
        async move {
            inv.page()
                .evaluate(&script)
                .await
                .map_err(AutomationError::from)
        }
        .boxed()
    })
    .await
}
