//! Navigation primitives. Driver navigation failures are surfaced as
//! `NavigationInterrupted`, which the engine treats as terminal.

use crate::driver::LoadState;
use crate::engine::{execute_action, ActionCx, ActionOptions, ActionResult};
use crate::error::AutomationError;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavOutcome {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

pub async fn navigate(
    cx: &ActionCx,
    url: &str,
    options: ActionOptions,
) -> ActionResult<NavOutcome> {
    let url = url.to_string();
    execute_action(cx, "navigate", options, move |inv| {
        let url = url.clone();
        async move {
            let page = inv.page();
            let status = page
                .goto(&url, LoadState::Load, inv.budget())
                .await
                .map_err(|err| {
                    AutomationError::NavigationInterrupted(format!("goto {url}: {err}"))
                })?;
            inv.note_event("navigate");
            Ok(NavOutcome {
                url: page.url(),
                status,
            })
        }
        .boxed()
    })
    .await
}

pub async fn reload(cx: &ActionCx, options: ActionOptions) -> ActionResult<NavOutcome> {
    execute_action(cx, "reload", options, move |inv| {
        async move {
            let page = inv.page();
            let status = page.reload(inv.budget()).await.map_err(|err| {
                AutomationError::NavigationInterrupted(format!("reload: {err}"))
            })?;
            Ok(NavOutcome {
                url: page.url(),
                status,
            })
        }
        .boxed()
    })
    .await
}

pub async fn go_back(cx: &ActionCx, options: ActionOptions) -> ActionResult<NavOutcome> {
    execute_action(cx, "back", options, move |inv| {
        async move {
            let page = inv.page();
            let status = page.go_back(inv.budget()).await.map_err(|err| {
                AutomationError::NavigationInterrupted(format!("back: {err}"))
            })?;
            Ok(NavOutcome {
                url: page.url(),
                status,
            })
        }
        .boxed()
    })
    .await
}

pub async fn go_forward(cx: &ActionCx, options: ActionOptions) -> ActionResult<NavOutcome> {
    execute_action(cx, "forward", options, move |inv| {
        async move {
            let page = inv.page();
            let status = page.go_forward(inv.budget()).await.map_err(|err| {
                AutomationError::NavigationInterrupted(format!("forward: {err}"))
            })?;
            Ok(NavOutcome {
                url: page.url(),
                status,
            })
        }
        .boxed()
    })
    .await
}

/// Wait until the pending navigation commits and the load event fires.
pub async fn wait_for_navigation(
    cx: &ActionCx,
    options: ActionOptions,
) -> ActionResult<NavOutcome> {
    execute_action(cx, "wait_for_navigation", options, move |inv| {
        async move {
            let page = inv.page();
            page.wait_for_load_state(LoadState::Load, inv.budget())
                .await
                .map_err(|err| {
                    AutomationError::NavigationInterrupted(format!("navigation wait: {err}"))
                })?;
            inv.note_wait("navigation", 0);
            Ok(NavOutcome {
                url: page.url(),
                status: None,
            })
        }
        .boxed()
    })
    .await
}
