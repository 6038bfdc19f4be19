//! Confidence Resolution
//!
//! Resolves a [`Selector`] to a live locator and reports which strategy won,
//! its index in the chain, and how long resolution took. This is the single
//! seam every element-touching primitive goes through.

use crate::driver::{Locator, Page, WaitState};
use crate::error::AutomationError;
use crate::selector::{Selector, SelectorStrategy};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cap on how long any single chain entry may wait before the resolver fails
/// over to the next strategy. Keeps total resolution bounded by the budget
/// regardless of chain length.
pub const PER_STRATEGY_CAP: Duration = Duration::from_millis(2000);

/// Pause between full passes over a chain whose entries all failed
/// immediately, so invalid selectors cannot spin the resolver.
const PASS_BACKOFF: Duration = Duration::from_millis(25);

/// Outcome of one successful resolution attempt.
#[derive(Clone)]
pub struct SelectorResolution {
    pub locator: Arc<dyn Locator>,
    pub strategy: SelectorStrategy,
    pub strategy_index: usize,
    pub resolution_ms: u64,
    pub chain_length: usize,
}

impl std::fmt::Debug for SelectorResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorResolution")
            .field("strategy", &self.strategy)
            .field("strategy_index", &self.strategy_index)
            .field("resolution_ms", &self.resolution_ms)
            .field("chain_length", &self.chain_length)
            .finish_non_exhaustive()
    }
}

/// Serialisable view of a resolution, recorded in trace metadata.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ResolutionMeta {
    pub strategy: String,
    pub strategy_index: usize,
    pub resolution_ms: u64,
    pub chain_length: usize,
}

impl SelectorResolution {
    pub fn meta(&self) -> ResolutionMeta {
        ResolutionMeta {
            strategy: self.strategy.describe(),
            strategy_index: self.strategy_index,
            resolution_ms: self.resolution_ms,
            chain_length: self.chain_length,
        }
    }
}

/// Build the driver locator for one strategy.
pub fn locator_for(page: &dyn Page, strategy: &SelectorStrategy) -> Arc<dyn Locator> {
    match strategy {
        SelectorStrategy::Css { selector } => page.locator(selector),
        SelectorStrategy::Aria { role, name } => page.by_role(role, name.as_deref()),
        SelectorStrategy::Text { text, exact } => page.by_text(text, *exact),
        SelectorStrategy::Label { text } => page.by_label(text),
        SelectorStrategy::TestId { id } => page.by_test_id(id),
        SelectorStrategy::Xpath { expression } => page.by_xpath(expression),
    }
}

/// Resolve a selector within `budget`, waiting for `state`.
pub async fn resolve(
    page: &Arc<dyn Page>,
    selector: &Selector,
    state: WaitState,
    budget: Duration,
) -> Result<SelectorResolution, AutomationError> {
    resolve_chain(page, &selector.strategies(), state, budget).await
}

/// Resolve an explicit strategy chain in source order.
///
/// Absence states (`hidden`/`detached`) probe the first strategy only.
/// Presence states fail over left-to-right, capping each entry's wait at
/// `min(remaining, 2000ms)`; strategies that error are skipped. The chain is
/// re-walked until the budget runs out, then the whole resolution fails with
/// `TargetNotFound`.
pub async fn resolve_chain(
    page: &Arc<dyn Page>,
    strategies: &[SelectorStrategy],
    state: WaitState,
    budget: Duration,
) -> Result<SelectorResolution, AutomationError> {
    if strategies.is_empty() {
        return Err(AutomationError::TargetNotFound(
            "empty selector chain".into(),
        ));
    }

    let started = Instant::now();
    let chain_length = strategies.len();

    if state.is_absence() {
        let strategy = &strategies[0];
        let locator = locator_for(page.as_ref(), strategy);
        return match locator.wait_for(state, budget).await {
            Ok(()) => Ok(SelectorResolution {
                locator,
                strategy: strategy.clone(),
                strategy_index: 0,
                resolution_ms: started.elapsed().as_millis() as u64,
                chain_length,
            }),
            Err(err) => Err(AutomationError::TargetNotFound(format!(
                "{} did not reach {:?}: {}",
                strategy.describe(),
                state,
                err
            ))),
        };
    }

    loop {
        let mut any_waited = false;
        for (index, strategy) in strategies.iter().enumerate() {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            let slice = remaining.min(PER_STRATEGY_CAP);
            let locator = locator_for(page.as_ref(), strategy);
            let waited = Instant::now();
            match locator.wait_for(state, slice).await {
                Ok(()) => {
                    return Ok(SelectorResolution {
                        locator,
                        strategy: strategy.clone(),
                        strategy_index: index,
                        resolution_ms: started.elapsed().as_millis() as u64,
                        chain_length,
                    });
                }
                Err(err) => {
                    // Failed strategies are skipped; only their time is spent.
                    tracing::debug!(
                        strategy = %strategy.describe(),
                        index,
                        "selector strategy missed: {err}"
                    );
                    if waited.elapsed() >= Duration::from_millis(1) {
                        any_waited = true;
                    }
                }
            }
        }

        if started.elapsed() >= budget {
            return Err(AutomationError::TargetNotFound(format!(
                "no strategy matched within {}ms (chain of {})",
                budget.as_millis(),
                chain_length
            )));
        }
        if !any_waited {
            tokio::time::sleep(PASS_BACKOFF).await;
        }
    }
}
