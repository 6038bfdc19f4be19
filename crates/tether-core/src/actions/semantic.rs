//! Semantic actions: identifier-driven form work. Instead of a caller
//! supplied selector these take a human identifier (a field name, label, or
//! placeholder) and walk an ordered candidate chain, preferring a cheap
//! `count() > 0` probe per candidate before falling back to the confidence
//! resolver over the whole chain.

use crate::driver::{Locator, Page, WaitState};
use crate::engine::{execute_action, ActionCx, ActionOptions, ActionResult, Invocation};
use crate::error::AutomationError;
use crate::resilience::stability;
use crate::resolve::{locator_for, resolve_chain, ResolutionMeta};
use crate::selector::{Selector, SelectorStrategy};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::interact::TypeMode;

const AUTOCOMPLETE_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticOutcome {
    pub matched: String,
    pub verified: bool,
}

fn scoped(scope: Option<&str>, selector: &str) -> String {
    match scope {
        Some(scope) => format!("{scope} {selector}"),
        None => selector.to_string(),
    }
}

fn field_candidates(identifier: &str, scope: Option<&str>) -> Vec<SelectorStrategy> {
    vec![
        SelectorStrategy::css(scoped(
            scope,
            &format!(
                "input[name='{identifier}'], textarea[name='{identifier}'], select[name='{identifier}']"
            ),
        )),
        SelectorStrategy::css(scoped(scope, &format!("[placeholder='{identifier}']"))),
        SelectorStrategy::css(scoped(scope, &format!("[aria-label='{identifier}']"))),
        SelectorStrategy::label(identifier),
    ]
}

fn submit_candidates(scope: Option<&str>) -> Vec<SelectorStrategy> {
    vec![
        SelectorStrategy::css(scoped(scope, "button[type='submit']")),
        SelectorStrategy::css(scoped(scope, "input[type='submit']")),
        SelectorStrategy::aria("button", Some("Submit")),
        SelectorStrategy::css(scoped(scope, "button")),
    ]
}

/// Fast path: the first candidate with at least one match wins without a
/// wait. Falls back to the confidence resolver across the whole chain.
async fn pick_candidate(
    page: &Arc<dyn Page>,
    candidates: &[SelectorStrategy],
    budget: Duration,
) -> Result<(Arc<dyn Locator>, ResolutionMeta), AutomationError> {
    let started = Instant::now();
    for (index, candidate) in candidates.iter().enumerate() {
        let locator = locator_for(page.as_ref(), candidate);
        if matches!(locator.count().await, Ok(n) if n > 0) {
            let meta = ResolutionMeta {
                strategy: candidate.describe(),
                strategy_index: index,
                resolution_ms: started.elapsed().as_millis() as u64,
                chain_length: candidates.len(),
            };
            return Ok((locator, meta));
        }
    }
    let resolution = resolve_chain(page, candidates, WaitState::Visible, budget).await?;
    let meta = resolution.meta();
    Ok((resolution.locator, meta))
}

async fn set_field_inner(
    inv: &Invocation,
    identifier: &str,
    value: &str,
    mode: TypeMode,
    scope: Option<&str>,
) -> Result<SemanticOutcome, AutomationError> {
    let page = inv.page();
    let candidates = field_candidates(identifier, scope);
    let (locator, meta) = pick_candidate(&page, &candidates, inv.budget()).await?;
    inv.note_resolution(meta.clone());

    let verified = super::interact::apply_input_for(inv, locator.as_ref(), value, mode).await?;
    Ok(SemanticOutcome {
        matched: meta.strategy,
        verified,
    })
}

/// Find a form field by identifier and set its value.
pub async fn set_field(
    cx: &ActionCx,
    identifier: &str,
    value: &str,
    mode: TypeMode,
    scope: Option<&str>,
    options: ActionOptions,
) -> ActionResult<SemanticOutcome> {
    let identifier = identifier.to_string();
    let value = value.to_string();
    let scope = scope.map(str::to_string);
    let options = options.with_selector(format!("field:{identifier}"));
    execute_action(cx, "set_field", options, move |inv| {
        let identifier = identifier.clone();
        let value = value.clone();
        let scope = scope.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            set_field_inner(inv.as_ref(), &identifier, &value, mode, scope.as_deref()).await
        }
        .boxed()
    })
    .await
}

/// Click the form's submit affordance.
pub async fn submit_form(
    cx: &ActionCx,
    scope: Option<&str>,
    options: ActionOptions,
) -> ActionResult<SemanticOutcome> {
    let scope = scope.map(str::to_string);
    execute_action(cx, "submit_form", options, move |inv| {
        let scope = scope.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let candidates = submit_candidates(scope.as_deref());
            let (locator, meta) = pick_candidate(&page, &candidates, inv.budget()).await?;
            inv.note_resolution(meta.clone());
            locator.scroll_into_view().await.map_err(AutomationError::from)?;
            locator.click().await.map_err(AutomationError::from)?;
            inv.note_event("click");
            inv.note_wait("dom_stability", stability::settle(&page).await);
            Ok(SemanticOutcome {
                matched: meta.strategy,
                verified: false,
            })
        }
        .boxed()
    })
    .await
}

/// Set a filter field, then click the apply affordance (submit button, or an
/// "Apply"/"Search"/"Filter" button) unless `skip_apply` opts out.
#[allow(clippy::too_many_arguments)]
pub async fn apply_filter(
    cx: &ActionCx,
    identifier: &str,
    value: &str,
    apply_selector: Option<Selector>,
    skip_apply: bool,
    scope: Option<&str>,
    options: ActionOptions,
) -> ActionResult<SemanticOutcome> {
    let identifier = identifier.to_string();
    let value = value.to_string();
    let scope = scope.map(str::to_string);
    let options = options.with_selector(format!("filter:{identifier}"));
    execute_action(cx, "apply_filter", options, move |inv| {
        let identifier = identifier.clone();
        let value = value.clone();
        let scope = scope.clone();
        let apply_selector = apply_selector.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let outcome = set_field_inner(
                inv.as_ref(),
                &identifier,
                &value,
                TypeMode::Fill,
                scope.as_deref(),
            )
            .await?;

            if skip_apply {
                return Ok(outcome);
            }

            let candidates = match &apply_selector {
                Some(selector) => selector.strategies(),
                None => {
                    let mut chain = submit_candidates(scope.as_deref());
                    chain.pop(); // the bare-button fallback casts too wide for filters
                    chain.push(SelectorStrategy::aria("button", Some("Apply")));
                    chain.push(SelectorStrategy::aria("button", Some("Search")));
                    chain.push(SelectorStrategy::aria("button", Some("Filter")));
                    chain
                }
            };
            let (locator, meta) = pick_candidate(&page, &candidates, inv.budget()).await?;
            inv.note_resolution(meta);
            locator.click().await.map_err(AutomationError::from)?;
            inv.note_event("click");
            inv.note_wait("dom_stability", stability::settle(&page).await);
            Ok(outcome)
        }
        .boxed()
    })
    .await
}

/// Type into an autocomplete field, then pick the matching option.
pub async fn select_autocomplete(
    cx: &ActionCx,
    field: Selector,
    text: &str,
    option_label: Option<&str>,
    options: ActionOptions,
) -> ActionResult<SemanticOutcome> {
    let text = text.to_string();
    let label = option_label.unwrap_or(text.as_str()).to_string();
    let options = options.with_selector(field.key());
    execute_action(cx, "select_autocomplete", options, move |inv| {
        let field = field.clone();
        let text = text.clone();
        let label = label.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);

            let resolution =
                resolve_chain(&page, &field.strategies(), WaitState::Visible, inv.budget())
                    .await?;
            inv.note_resolution(resolution.meta());
            resolution.locator.click().await.map_err(AutomationError::from)?;
            resolution
                .locator
                .type_text(&text, Duration::from_millis(50))
                .await
                .map_err(AutomationError::from)?;
            inv.note_event("keydown");
            tokio::time::sleep(AUTOCOMPLETE_SETTLE).await;

            let option_chain = vec![
                SelectorStrategy::aria("option", Some(label.as_str())),
                SelectorStrategy::text(label.clone(), true),
                SelectorStrategy::css("[role='listbox'] [role='option']"),
                SelectorStrategy::css("ul li"),
            ];
            let option =
                resolve_chain(&page, &option_chain, WaitState::Visible, inv.budget()).await?;
            option.locator.click().await.map_err(AutomationError::from)?;
            inv.note_event("click");
            inv.note_wait("dom_stability", stability::settle(&page).await);
            Ok(SemanticOutcome {
                matched: option.strategy.describe(),
                verified: false,
            })
        }
        .boxed()
    })
    .await
}

/// Set a date input through the native setter, close any date popover with
/// Enter/Escape, and verify the input kept a value.
pub async fn set_date_field(
    cx: &ActionCx,
    selector: Selector,
    value: &str,
    options: ActionOptions,
) -> ActionResult<SemanticOutcome> {
    let value = value.to_string();
    let options = options.with_selector(selector.key());
    execute_action(cx, "set_date_field", options, move |inv| {
        let selector = selector.clone();
        let value = value.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let resolution = resolve_chain(
                &page,
                &selector.strategies(),
                WaitState::Visible,
                inv.budget(),
            )
            .await?;
            inv.note_resolution(resolution.meta());

            super::interact::apply_input_for(
                inv.as_ref(),
                resolution.locator.as_ref(),
                &value,
                TypeMode::NativeSetter,
            )
            .await?;
            resolution.locator.press("Enter").await.map_err(AutomationError::from)?;
            resolution.locator.press("Escape").await.map_err(AutomationError::from)?;
            inv.note_event("keydown");

            let current = resolution
                .locator
                .input_value()
                .await
                .map_err(AutomationError::from)?;
            if current.is_empty() {
                return Err(AutomationError::AssertionFailed(
                    "date input is empty after set".into(),
                ));
            }
            Ok(SemanticOutcome {
                matched: resolution.strategy.describe(),
                verified: true,
            })
        }
        .boxed()
    })
    .await
}
