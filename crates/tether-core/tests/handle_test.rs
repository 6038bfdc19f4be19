//! Handle registry: stable ids across DOM mutations, last-winner
//! memoisation, and remap accounting.

use std::sync::Arc;
use std::time::Duration;
use tether_core::driver::{Driver, Page, WaitState};
use tether_core::error::AutomationError;
use tether_core::handle::HandleRegistry;
use tether_core::mock::{MockDriver, MockElement, MockPage};
use tether_core::selector::{Selector, SelectorStrategy};

const BUDGET: Duration = Duration::from_secs(5);

async fn page_with_button() -> (Arc<dyn Page>, Arc<MockPage>) {
    let driver = MockDriver::new();
    let hub = driver.hub();
    let browser = driver.launch().await.unwrap();
    let context = browser.new_context().await.unwrap();
    let page = context.new_page().await.unwrap();
    let mock = hub.last_page().unwrap();
    mock.add_element(
        MockElement::new("button")
            .with_id("btn")
            .with_test_id("action-btn")
            .with_text("Do it"),
    );
    (page, mock)
}

#[tokio::test]
async fn register_stores_the_winning_strategy() {
    let (page, _mock) = page_with_button().await;
    let registry = HandleRegistry::new();

    let handle = registry
        .register(
            &page,
            Selector::Chain(vec![
                SelectorStrategy::css("#btn"),
                SelectorStrategy::test_id("action-btn"),
            ]),
            BUDGET,
        )
        .await
        .unwrap();

    assert_eq!(handle.handle_id.len(), 10);
    assert_eq!(handle.last_winning, SelectorStrategy::css("#btn"));
    assert_eq!(handle.remap_count, 0);
    assert!(registry.get(&handle.handle_id).is_some());
}

#[tokio::test]
async fn dom_mutation_remaps_once_then_steadies() {
    let (page, mock) = page_with_button().await;
    let registry = HandleRegistry::new();

    let handle = registry
        .register(
            &page,
            Selector::Chain(vec![
                SelectorStrategy::css("#btn"),
                SelectorStrategy::test_id("action-btn"),
            ]),
            BUDGET,
        )
        .await
        .unwrap();

    // The id attribute disappears; only the testid strategy still matches.
    mock.set_attr("[data-testid='action-btn']", "id", None);

    let resolved = registry
        .resolve(&page, &handle.handle_id, WaitState::Visible, BUDGET)
        .await
        .unwrap();
    assert!(resolved.remapped);
    assert_eq!(resolved.remap_count, 1);
    assert_eq!(
        resolved.resolution.strategy,
        SelectorStrategy::test_id("action-btn")
    );

    // Steady state: the new winner leads the chain, one attempt resolves.
    let again = registry
        .resolve(&page, &handle.handle_id, WaitState::Visible, BUDGET)
        .await
        .unwrap();
    assert!(!again.remapped);
    assert_eq!(again.remap_count, 1);
    assert_eq!(again.resolution.strategy_index, 0);
}

#[tokio::test]
async fn unknown_handle_is_stale() {
    let (page, _mock) = page_with_button().await;
    let registry = HandleRegistry::new();
    let err = registry
        .resolve(&page, "nope123456", WaitState::Visible, BUDGET)
        .await
        .unwrap_err();
    assert!(matches!(err, AutomationError::StaleElement(_)));
}

#[tokio::test]
async fn release_and_clear_empty_the_registry() {
    let (page, _mock) = page_with_button().await;
    let registry = HandleRegistry::new();
    let handle = registry
        .register(&page, Selector::from("#btn"), BUDGET)
        .await
        .unwrap();

    assert!(registry.release(&handle.handle_id));
    assert!(!registry.release(&handle.handle_id));
    assert!(registry.is_empty());

    let handle = registry
        .register(&page, Selector::from("#btn"), BUDGET)
        .await
        .unwrap();
    registry.clear();
    assert!(registry.get(&handle.handle_id).is_none());
}
