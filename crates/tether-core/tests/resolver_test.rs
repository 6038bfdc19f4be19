//! Confidence-resolver contract: wrapping, fallback order, budgets, and
//! absence probing.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::driver::{Browser, BrowserContext, Driver, Page, WaitState};
use tether_core::error::AutomationError;
use tether_core::mock::{MockDriver, MockElement};
use tether_core::resolve::{resolve, resolve_chain};
use tether_core::selector::{Selector, SelectorStrategy};

async fn page_with(elements: Vec<MockElement>) -> Arc<dyn Page> {
    let driver = MockDriver::new();
    let hub = driver.hub();
    let browser = driver.launch().await.unwrap();
    let context = browser.new_context().await.unwrap();
    let page = context.new_page().await.unwrap();
    let mock = hub.last_page().unwrap();
    for element in elements {
        mock.add_element(element);
    }
    page
}

#[tokio::test]
async fn css_string_resolves_as_single_entry_chain() {
    let page = page_with(vec![MockElement::new("button").with_id("go")]).await;
    let resolution = resolve(
        &page,
        &Selector::from("#go"),
        WaitState::Visible,
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert_eq!(resolution.strategy_index, 0);
    assert_eq!(resolution.chain_length, 1);
    assert_eq!(resolution.strategy, SelectorStrategy::css("#go"));
}

#[tokio::test]
async fn empty_chain_is_target_not_found() {
    let page = page_with(vec![]).await;
    let err = resolve(
        &page,
        &Selector::Chain(vec![]),
        WaitState::Visible,
        Duration::from_secs(1),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AutomationError::TargetNotFound(_)));
    assert_eq!(err.code(), Some("TARGET_NOT_FOUND"));
}

#[tokio::test]
async fn chain_falls_over_to_later_strategy_and_reports_it() {
    let page = page_with(vec![MockElement::new("button")
        .with_test_id("action-btn")
        .with_text("Go")])
    .await;

    let chain = vec![
        SelectorStrategy::css("#missing"),
        SelectorStrategy::test_id("action-btn"),
    ];
    let started = Instant::now();
    let resolution = resolve_chain(&page, &chain, WaitState::Visible, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(resolution.strategy_index, 1);
    assert_eq!(resolution.chain_length, 2);
    assert_eq!(resolution.strategy, SelectorStrategy::test_id("action-btn"));
    // The dead first entry is capped at 2s, not the whole budget.
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn budget_exhaustion_fails_with_target_not_found() {
    let page = page_with(vec![]).await;
    let chain = vec![
        SelectorStrategy::css("#a"),
        SelectorStrategy::test_id("nope"),
    ];
    let started = Instant::now();
    let err = resolve_chain(&page, &chain, WaitState::Visible, Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(matches!(err, AutomationError::TargetNotFound(_)));
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn absence_states_probe_only_the_first_strategy() {
    // #gone is absent, so `hidden` on the first strategy succeeds even
    // though the second strategy matches a visible element.
    let page = page_with(vec![MockElement::new("div").with_test_id("still-here")]).await;
    let chain = vec![
        SelectorStrategy::css("#gone"),
        SelectorStrategy::test_id("still-here"),
    ];
    let resolution = resolve_chain(&page, &chain, WaitState::Hidden, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(resolution.strategy_index, 0);
}

#[tokio::test]
async fn late_elements_are_picked_up_within_budget() {
    let driver = MockDriver::new();
    let hub = driver.hub();
    let browser = driver.launch().await.unwrap();
    let context = browser.new_context().await.unwrap();
    let page = context.new_page().await.unwrap();
    let mock = hub.last_page().unwrap();

    let mock_for_task = Arc::clone(&mock);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        mock_for_task.add_element(MockElement::new("button").with_id("late"));
    });

    let resolution = resolve(
        &page,
        &Selector::from("#late"),
        WaitState::Visible,
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    assert!(resolution.resolution_ms >= 100);
}
