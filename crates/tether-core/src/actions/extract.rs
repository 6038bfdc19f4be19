//! Read primitives: text, attributes, bulk element maps, and whole-page
//! content. Reads settle the DOM first so they observe a quiet document.

use crate::driver::WaitState;
use crate::engine::{execute_action, ActionCx, ActionOptions, ActionResult};
use crate::error::AutomationError;
use crate::resilience::stability;
use crate::resolve::resolve_chain;
use crate::selector::Selector;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const PAGE_CONTENT_SCRIPT: &str = r#"
(() => {
  if (!document.body) return '';
  const clone = document.body.cloneNode(true);
  clone.querySelectorAll('script, style, noscript, svg').forEach((el) => el.remove());
  return (clone.textContent || '').replace(/\s+/g, ' ').trim();
})()
"#;

pub async fn get_text(
    cx: &ActionCx,
    selector: Selector,
    options: ActionOptions,
) -> ActionResult<Option<String>> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "get_text", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let chain = strategies.lock().unwrap().clone();
            let resolution = resolve_chain(&page, &chain, WaitState::Visible, inv.budget()).await?;
            inv.note_resolution(resolution.meta());
            let text = resolution
                .locator
                .text_content()
                .await
                .map_err(AutomationError::from)?;
            Ok(text.map(|t| t.trim().to_string()))
        }
        .boxed()
    })
    .await
}

pub async fn get_attribute(
    cx: &ActionCx,
    selector: Selector,
    attribute: &str,
    options: ActionOptions,
) -> ActionResult<Option<String>> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let attribute = attribute.to_string();
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "get_attribute", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        let attribute = attribute.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let chain = strategies.lock().unwrap().clone();
            let resolution =
                resolve_chain(&page, &chain, WaitState::Attached, inv.budget()).await?;
            inv.note_resolution(resolution.meta());
            resolution
                .locator
                .get_attribute(&attribute)
                .await
                .map_err(AutomationError::from)
        }
        .boxed()
    })
    .await
}

/// Materialise one map per matching element. Keys are `textContent`,
/// `innerHTML`, or an HTML attribute name.
pub async fn get_all(
    cx: &ActionCx,
    selector: Selector,
    keys: Vec<String>,
    limit: Option<usize>,
    options: ActionOptions,
) -> ActionResult<Vec<HashMap<String, Option<String>>>> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "get_all", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        let keys = keys.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let chain = strategies.lock().unwrap().clone();
            let resolution =
                resolve_chain(&page, &chain, WaitState::Attached, inv.budget()).await?;
            inv.note_resolution(resolution.meta());

            let count = resolution.locator.count().await.map_err(AutomationError::from)?;
            let take = limit.map_or(count, |cap| count.min(cap));
            let mut rows = Vec::with_capacity(take);
            for index in 0..take {
                let element = resolution.locator.nth(index);
                let mut row = HashMap::with_capacity(keys.len());
                for key in &keys {
                    let value = match key.as_str() {
                        "textContent" => {
                            element.text_content().await.map_err(AutomationError::from)?
                        }
                        "innerHTML" => Some(
                            element.inner_html().await.map_err(AutomationError::from)?,
                        ),
                        attr => element
                            .get_attribute(attr)
                            .await
                            .map_err(AutomationError::from)?,
                    };
                    row.insert(key.clone(), value);
                }
                rows.push(row);
            }
            Ok(rows)
        }
        .boxed()
    })
    .await
}

/// Readable text of the whole page: script/style/noscript/svg stripped,
/// whitespace collapsed.
pub async fn get_page_content(cx: &ActionCx, options: ActionOptions) -> ActionResult<String> {
    execute_action(cx, "get_content", options, move |inv| {
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let value = page
                .evaluate(PAGE_CONTENT_SCRIPT)
                .await
                .map_err(AutomationError::from)?;
            Ok(value.as_str().unwrap_or_default().to_string())
        }
        .boxed()
    })
    .await
}
