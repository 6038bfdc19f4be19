//! Interaction primitives: click, type (four input modes), select, check,
//! hover, drag-and-drop, and batch fill. Interactions settle the DOM before
//! and after acting, and value-setting paths verify by read-back.

use crate::driver::{Locator, WaitState};
use crate::engine::{execute_action, ActionCx, ActionOptions, ActionResult, Invocation};
use crate::error::AutomationError;
use crate::resilience::stability;
use crate::resolve::resolve_chain;
use crate::selector::Selector;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Repeat clicks against the same selector key inside this window are
/// suppressed and reported as success; a retried attempt must not double-fire
/// a click whose first attempt landed.
pub const CLICK_DEDUP_WINDOW: Duration = Duration::from_millis(500);

const DEFAULT_KEY_DELAY: Duration = Duration::from_millis(50);

/// How typed text reaches the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TypeMode {
    /// Programmatic set, then read-back verification against the exact string.
    #[default]
    Fill,
    /// Per-keystroke typing for autocomplete widgets.
    Sequential,
    /// Clipboard paste event with a DataTransfer payload, with a
    /// value-set fallback.
    Paste,
    /// Native value setter plus input/change/blur so frameworks with
    /// controlled inputs observe the change.
    NativeSetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickOutcome {
    pub clicked: bool,
    pub skipped_duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeOutcome {
    pub mode: TypeMode,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub filled: Vec<String>,
    pub failed: Vec<String>,
}

const PASTE_SCRIPT: &str = r#"
(() => {
  const text = %TEXT%;
  const fallback = () => {
    el.value = text;
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
  };
  try {
    const data = new DataTransfer();
    data.setData('text/plain', text);
    el.focus();
    el.dispatchEvent(new ClipboardEvent('paste', {
      clipboardData: data,
      bubbles: true,
      cancelable: true,
    }));
    if (el.value !== text) fallback();
  } catch (e) {
    fallback();
  }
  return el.value;
})()
"#;

const NATIVE_SETTER_SCRIPT: &str = r#"
(() => {
  const text = %TEXT%;
  const proto = el instanceof HTMLTextAreaElement
    ? HTMLTextAreaElement.prototype
    : HTMLInputElement.prototype;
  const descriptor = Object.getOwnPropertyDescriptor(proto, 'value');
  if (descriptor && descriptor.set) {
    descriptor.set.call(el, text);
  } else {
    el.value = text;
  }
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  el.dispatchEvent(new Event('blur', { bubbles: true }));
  return el.value;
})()
"#;

pub async fn click(
    cx: &ActionCx,
    selector: Selector,
    options: ActionOptions,
) -> ActionResult<ClickOutcome> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let key = selector.key();
    let options = options
        .with_selector(key.clone())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "click", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        let key = key.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);

            if inv.recently_clicked(&key, CLICK_DEDUP_WINDOW) {
                tracing::debug!(selector = %key, "duplicate click suppressed");
                return Ok(ClickOutcome {
                    clicked: false,
                    skipped_duplicate: true,
                });
            }

            let chain = strategies.lock().unwrap().clone();
            let resolution = resolve_chain(&page, &chain, WaitState::Visible, inv.budget()).await?;
            inv.note_resolution(resolution.meta());

            resolution
                .locator
                .scroll_into_view()
                .await
                .map_err(AutomationError::from)?;
            resolution.locator.click().await.map_err(AutomationError::from)?;
            inv.record_click(&key);
            inv.note_event("click");

            inv.note_wait("dom_stability", stability::settle(&page).await);
            Ok(ClickOutcome {
                clicked: true,
                skipped_duplicate: false,
            })
        }
        .boxed()
    })
    .await
}

pub async fn type_text(
    cx: &ActionCx,
    selector: Selector,
    text: &str,
    mode: TypeMode,
    key_delay: Option<Duration>,
    options: ActionOptions,
) -> ActionResult<TypeOutcome> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let text = text.to_string();
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "type", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        let text = text.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let chain = strategies.lock().unwrap().clone();
            let resolution = resolve_chain(&page, &chain, WaitState::Visible, inv.budget()).await?;
            inv.note_resolution(resolution.meta());

            let verified =
                apply_input(inv.as_ref(), resolution.locator.as_ref(), &text, mode, key_delay).await?;
            Ok(TypeOutcome { mode, verified })
        }
        .boxed()
    })
    .await
}

/// Mode-driven input without a keystroke delay override; shared with the
/// semantic actions.
pub(crate) async fn apply_input_for(
    inv: &Invocation,
    locator: &dyn Locator,
    text: &str,
    mode: TypeMode,
) -> Result<bool, AutomationError> {
    apply_input(inv, locator, text, mode, None).await
}

/// Set a value through the selected mode; returns whether the value was
/// read back and matched.
async fn apply_input(
    inv: &Invocation,
    locator: &dyn Locator,
    text: &str,
    mode: TypeMode,
    key_delay: Option<Duration>,
) -> Result<bool, AutomationError> {
    match mode {
        TypeMode::Fill => {
            locator.fill(text).await.map_err(AutomationError::from)?;
            inv.note_event("input");
            let value = locator.input_value().await.map_err(AutomationError::from)?;
            if value != text {
                return Err(AutomationError::AssertionFailed(format!(
                    "fill verification: expected {text:?}, found {value:?}"
                )));
            }
            Ok(true)
        }
        TypeMode::Sequential => {
            locator.click().await.map_err(AutomationError::from)?;
            locator
                .type_text(text, key_delay.unwrap_or(DEFAULT_KEY_DELAY))
                .await
                .map_err(AutomationError::from)?;
            inv.note_event("keydown");
            Ok(false)
        }
        TypeMode::Paste => {
            let script = PASTE_SCRIPT.replace("%TEXT%", &json_string(text));
            locator
                .evaluate(&script)
                .await
                .map_err(AutomationError::from)?;
            inv.note_event("paste");
            Ok(false)
        }
        TypeMode::NativeSetter => {
            let script = NATIVE_SETTER_SCRIPT.replace("%TEXT%", &json_string(text));
            locator
                .evaluate(&script)
                .await
                .map_err(AutomationError::from)?;
            inv.note_event("input");
            inv.note_event("change");
            inv.note_event("blur");
            Ok(false)
        }
    }
}

pub async fn select_option(
    cx: &ActionCx,
    selector: Selector,
    value: &str,
    options: ActionOptions,
) -> ActionResult<String> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let value = value.to_string();
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "select", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        let value = value.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let chain = strategies.lock().unwrap().clone();
            let resolution = resolve_chain(&page, &chain, WaitState::Visible, inv.budget()).await?;
            inv.note_resolution(resolution.meta());

            resolution
                .locator
                .select_option(&value)
                .await
                .map_err(AutomationError::from)?;
            inv.note_event("change");

            let selected = resolution
                .locator
                .input_value()
                .await
                .map_err(AutomationError::from)?;
            if selected != value {
                return Err(AutomationError::AssertionFailed(format!(
                    "select verification: expected {value:?}, found {selected:?}"
                )));
            }
            Ok(selected)
        }
        .boxed()
    })
    .await
}

pub async fn set_checked(
    cx: &ActionCx,
    selector: Selector,
    checked: bool,
    options: ActionOptions,
) -> ActionResult<bool> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let name = if checked { "check" } else { "uncheck" };
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, name, options, move |inv| {
        let strategies = Arc::clone(&strategies);
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let chain = strategies.lock().unwrap().clone();
            let resolution = resolve_chain(&page, &chain, WaitState::Visible, inv.budget()).await?;
            inv.note_resolution(resolution.meta());

            resolution
                .locator
                .set_checked(checked)
                .await
                .map_err(AutomationError::from)?;
            inv.note_event("change");

            let state = resolution
                .locator
                .evaluate("el.checked")
                .await
                .map_err(AutomationError::from)?;
            if state.as_bool() != Some(checked) {
                return Err(AutomationError::AssertionFailed(format!(
                    "checkbox verification: expected checked={checked}"
                )));
            }
            Ok(checked)
        }
        .boxed()
    })
    .await
}

pub async fn hover(
    cx: &ActionCx,
    selector: Selector,
    options: ActionOptions,
) -> ActionResult<()> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "hover", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let chain = strategies.lock().unwrap().clone();
            let resolution = resolve_chain(&page, &chain, WaitState::Visible, inv.budget()).await?;
            inv.note_resolution(resolution.meta());
            resolution.locator.hover().await.map_err(AutomationError::from)?;
            inv.note_event("hover");
            inv.note_wait("dom_stability", stability::settle(&page).await);
            Ok(())
        }
        .boxed()
    })
    .await
}

pub async fn drag_and_drop(
    cx: &ActionCx,
    source: Selector,
    target: Selector,
    options: ActionOptions,
) -> ActionResult<()> {
    let options = options.with_selector(source.key());
    execute_action(cx, "drag_and_drop", options, move |inv| {
        let source = source.clone();
        let target = target.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let from = resolve_chain(
                &page,
                &source.strategies(),
                WaitState::Visible,
                inv.budget(),
            )
            .await?;
            inv.note_resolution(from.meta());
            let to = resolve_chain(
                &page,
                &target.strategies(),
                WaitState::Visible,
                inv.budget(),
            )
            .await?;
            from.locator
                .drag_to(Arc::clone(&to.locator))
                .await
                .map_err(AutomationError::from)?;
            inv.note_event("dragend");
            inv.note_wait("dom_stability", stability::settle(&page).await);
            Ok(())
        }
        .boxed()
    })
    .await
}

/// Fill several fields in one engine envelope. Every entry is verified by
/// read-back; any failure fails the batch so the engine retries it whole.
pub async fn fill_fields(
    cx: &ActionCx,
    fields: Vec<(Selector, String)>,
    options: ActionOptions,
) -> ActionResult<FillReport> {
    execute_action(cx, "fill_form", options, move |inv| {
        let fields = fields.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);

            let mut report = FillReport {
                filled: Vec::new(),
                failed: Vec::new(),
            };
            for (selector, value) in &fields {
                let key = selector.key();
                let filled = async {
                    let resolution = resolve_chain(
                        &page,
                        &selector.strategies(),
                        WaitState::Visible,
                        inv.budget(),
                    )
                    .await?;
                    apply_input(
                        inv.as_ref(),
                        resolution.locator.as_ref(),
                        value,
                        TypeMode::Fill,
                        None,
                    )
                    .await
                }
                .await;
                match filled {
                    Ok(_) => report.filled.push(key),
                    Err(err) => {
                        tracing::debug!(selector = %key, "fill entry failed: {err}");
                        report.failed.push(key);
                    }
                }
            }

            if !report.failed.is_empty() {
                return Err(AutomationError::AssertionFailed(format!(
                    "{} of {} fields failed: {}",
                    report.failed.len(),
                    fields.len(),
                    report.failed.join(", ")
                )));
            }
            Ok(report)
        }
        .boxed()
    })
    .await
}

fn json_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}
