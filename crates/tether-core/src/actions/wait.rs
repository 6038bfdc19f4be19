//! Wait primitives: thin adapters over the driver's waits. Every wait
//! records a `waits_performed` trace entry.

use crate::driver::{LoadState, WaitState};
use crate::engine::{execute_action, ActionCx, ActionOptions, ActionResult};
use crate::error::AutomationError;
use crate::resolve::resolve_chain;
use crate::selector::Selector;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const CONDITION_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitOutcome {
    pub satisfied: bool,
    pub waited_ms: u64,
}

pub async fn wait_for_selector(
    cx: &ActionCx,
    selector: Selector,
    state: WaitState,
    options: ActionOptions,
) -> ActionResult<WaitOutcome> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "wait_for_selector", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        async move {
            let page = inv.page();
            let chain = strategies.lock().unwrap().clone();
            let started = Instant::now();
            let resolution = resolve_chain(&page, &chain, state, inv.budget()).await?;
            let waited_ms = started.elapsed().as_millis() as u64;
            inv.note_resolution(resolution.meta());
            inv.note_wait("selector", waited_ms);
            Ok(WaitOutcome {
                satisfied: true,
                waited_ms,
            })
        }
        .boxed()
    })
    .await
}

/// Poll a page expression until it evaluates truthy.
pub async fn wait_for_condition(
    cx: &ActionCx,
    expression: &str,
    options: ActionOptions,
) -> ActionResult<WaitOutcome> {
    let expression = expression.to_string();
    execute_action(cx, "wait_for_condition", options, move |inv| {
        let expression = expression.clone();
        async move {
            let page = inv.page();
            let started = Instant::now();
            let script = format!("!!({expression})");
            loop {
                match page.evaluate(&script).await {
                    Ok(value) if value.as_bool() == Some(true) => {
                        let waited_ms = started.elapsed().as_millis() as u64;
                        inv.note_wait("condition", waited_ms);
                        return Ok(WaitOutcome {
                            satisfied: true,
                            waited_ms,
                        });
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!("condition poll error: {err}");
                    }
                }
                if started.elapsed() >= inv.budget() {
                    return Err(AutomationError::TimeoutExceeded(format!(
                        "condition not met within {}ms: {expression}",
                        inv.budget().as_millis()
                    )));
                }
                tokio::time::sleep(CONDITION_POLL).await;
            }
        }
        .boxed()
    })
    .await
}

pub async fn wait_for_network_idle(
    cx: &ActionCx,
    options: ActionOptions,
) -> ActionResult<WaitOutcome> {
    execute_action(cx, "wait_for_network_idle", options, move |inv| {
        async move {
            let page = inv.page();
            let started = Instant::now();
            page.wait_for_load_state(LoadState::NetworkIdle, inv.budget())
                .await
                .map_err(AutomationError::from)?;
            let waited_ms = started.elapsed().as_millis() as u64;
            inv.note_wait("network_idle", waited_ms);
            Ok(WaitOutcome {
                satisfied: true,
                waited_ms,
            })
        }
        .boxed()
    })
    .await
}

/// Wait until the page URL contains `fragment`.
pub async fn wait_for_url(
    cx: &ActionCx,
    fragment: &str,
    options: ActionOptions,
) -> ActionResult<WaitOutcome> {
    let fragment = fragment.to_string();
    execute_action(cx, "wait_for_url", options, move |inv| {
        let fragment = fragment.clone();
        async move {
            let page = inv.page();
            let started = Instant::now();
            page.wait_for_url(&fragment, inv.budget())
                .await
                .map_err(AutomationError::from)?;
            let waited_ms = started.elapsed().as_millis() as u64;
            inv.note_wait("url", waited_ms);
            Ok(WaitOutcome {
                satisfied: true,
                waited_ms,
            })
        }
        .boxed()
    })
    .await
}
