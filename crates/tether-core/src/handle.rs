//! Handle Registry
//!
//! Stable opaque ids over selector strategies. A handle re-resolves across
//! DOM mutations; the registry memoises the last winning strategy so the
//! steady-state path is a single resolution attempt, and counts remaps so
//! callers can observe selector drift.

use crate::driver::{Page, WaitState};
use crate::error::AutomationError;
use crate::resolve::{resolve_chain, SelectorResolution};
use crate::selector::{Selector, SelectorStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const HANDLE_ID_LEN: usize = 10;

/// Registered handle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementHandle {
    pub handle_id: String,
    pub original: Selector,
    pub last_winning: SelectorStrategy,
    pub remap_count: u32,
}

/// Result of re-resolving a handle.
#[derive(Debug)]
pub struct ResolvedHandle {
    pub resolution: SelectorResolution,
    pub remapped: bool,
    pub remap_count: u32,
}

/// Per-session map from handle id to record.
#[derive(Default)]
pub struct HandleRegistry {
    entries: Mutex<HashMap<String, ElementHandle>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve once with `attached` and store the winning strategy.
    pub async fn register(
        &self,
        page: &Arc<dyn Page>,
        selector: Selector,
        budget: Duration,
    ) -> Result<ElementHandle, AutomationError> {
        let strategies = selector.strategies();
        let resolution = resolve_chain(page, &strategies, WaitState::Attached, budget).await?;

        let handle = ElementHandle {
            handle_id: self.mint_id(),
            original: selector,
            last_winning: resolution.strategy,
            remap_count: 0,
        };
        self.entries
            .lock()
            .unwrap()
            .insert(handle.handle_id.clone(), handle.clone());
        Ok(handle)
    }

    /// Re-resolve with the last winner tried first. A different winner than
    /// the stored one is recorded and reported as a remap.
    pub async fn resolve(
        &self,
        page: &Arc<dyn Page>,
        handle_id: &str,
        state: WaitState,
        budget: Duration,
    ) -> Result<ResolvedHandle, AutomationError> {
        let record = self.get(handle_id).ok_or_else(|| {
            AutomationError::StaleElement(format!("unknown handle: {handle_id}"))
        })?;

        let chain = prioritised_chain(&record);
        let resolution = resolve_chain(page, &chain, state, budget).await?;

        let remapped = resolution.strategy != record.last_winning;
        let remap_count = if remapped {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(handle_id) {
                Some(entry) => {
                    entry.last_winning = resolution.strategy.clone();
                    entry.remap_count += 1;
                    tracing::debug!(
                        handle = handle_id,
                        strategy = %entry.last_winning.describe(),
                        remaps = entry.remap_count,
                        "handle remapped"
                    );
                    entry.remap_count
                }
                // Released concurrently; report the stale record's count.
                None => record.remap_count + 1,
            }
        } else {
            record.remap_count
        };

        Ok(ResolvedHandle {
            resolution,
            remapped,
            remap_count,
        })
    }

    /// The record without re-resolving.
    pub fn get(&self, handle_id: &str) -> Option<ElementHandle> {
        self.entries.lock().unwrap().get(handle_id).cloned()
    }

    pub fn release(&self, handle_id: &str) -> bool {
        self.entries.lock().unwrap().remove(handle_id).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    fn mint_id(&self) -> String {
        let entries = self.entries.lock().unwrap();
        loop {
            let id: String = Uuid::new_v4().simple().to_string()[..HANDLE_ID_LEN].to_string();
            if !entries.contains_key(&id) {
                return id;
            }
        }
    }
}

/// `[last_winning, ...original \ last_winning]`.
fn prioritised_chain(record: &ElementHandle) -> Vec<SelectorStrategy> {
    let mut chain = vec![record.last_winning.clone()];
    for strategy in record.original.strategies() {
        if strategy != record.last_winning {
            chain.push(strategy);
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorStrategy;

    #[test]
    fn prioritised_chain_moves_winner_first() {
        let record = ElementHandle {
            handle_id: "abcdef0123".into(),
            original: Selector::Chain(vec![
                SelectorStrategy::css("#btn"),
                SelectorStrategy::test_id("action-btn"),
            ]),
            last_winning: SelectorStrategy::test_id("action-btn"),
            remap_count: 1,
        };
        let chain = prioritised_chain(&record);
        assert_eq!(
            chain,
            vec![
                SelectorStrategy::test_id("action-btn"),
                SelectorStrategy::css("#btn"),
            ]
        );
    }
}
