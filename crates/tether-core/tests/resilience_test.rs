//! Popup dismisser and DOM-stability behaviour.

use std::sync::Arc;
use std::time::Duration;
use tether_core::driver::{Browser, BrowserContext, DialogPolicy, Driver};
use tether_core::mock::{ClickEffect, MockDriver, MockElement};
use tether_core::resilience::{stability, DismissRules, PopupDismisser};

#[tokio::test]
async fn sweep_clicks_the_first_visible_overlay() {
    let driver = MockDriver::new();
    let hub = driver.hub();
    let browser = driver.launch().await.unwrap();
    let context = browser.new_context().await.unwrap();
    let page = context.new_page().await.unwrap();
    let mock = hub.last_page().unwrap();

    // A consent button that removes itself when clicked.
    mock.add_element(
        MockElement::new("button")
            .with_id("consent")
            .with_class("cc-btn")
            .with_class("cc-allow")
            .with_text("Accept")
            .on_click(ClickEffect::RemoveElement {
                selector: "#consent".to_string(),
            }),
    );
    mock.add_element(MockElement::new("button").with_id("real-target"));

    let dismisser = PopupDismisser::new(Arc::new(DismissRules::default()));
    let dismissed = dismisser.sweep_once(&page).await;
    assert!(dismissed);
    assert_eq!(mock.clicks(), vec!["#consent".to_string()]);

    // Nothing left to dismiss.
    assert!(!dismisser.sweep_once(&page).await);
}

#[tokio::test]
async fn hidden_overlays_are_not_clicked() {
    let driver = MockDriver::new();
    let hub = driver.hub();
    let browser = driver.launch().await.unwrap();
    let context = browser.new_context().await.unwrap();
    let page = context.new_page().await.unwrap();
    let mock = hub.last_page().unwrap();

    mock.add_element(
        MockElement::new("button")
            .with_class("modal-close")
            .hidden(),
    );

    let dismisser = PopupDismisser::new(Arc::new(DismissRules::default()));
    assert!(!dismisser.sweep_once(&page).await);
    assert!(mock.clicks().is_empty());
}

#[tokio::test]
async fn start_arms_the_dialog_policy_and_stops_on_drop() {
    let driver = MockDriver::new();
    let hub = driver.hub();
    let browser = driver.launch().await.unwrap();
    let context = browser.new_context().await.unwrap();
    let page = context.new_page().await.unwrap();
    let mock = hub.last_page().unwrap();

    let rules = DismissRules::new(vec![], Duration::from_millis(20), DialogPolicy::AutoDismiss);
    let dismisser = PopupDismisser::new(Arc::new(rules));
    let guard = dismisser.start(Arc::clone(&page));
    assert_eq!(mock.dialog_policy(), DialogPolicy::AutoDismiss);

    // Background sweeps pick up overlays that appear mid-action.
    mock.add_element(
        MockElement::new("button")
            .with_class("modal-close")
            .on_click(ClickEffect::RemoveElement {
                selector: ".modal-close".to_string(),
            }),
    );
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(mock.clicks().len(), 1);

    drop(guard);
    mock.add_element(
        MockElement::new("button")
            .with_class("modal-close")
            .on_click(ClickEffect::RemoveElement {
                selector: ".modal-close".to_string(),
            }),
    );
    tokio::time::sleep(Duration::from_millis(120)).await;
    // The sweeper is gone; the new overlay stays.
    assert_eq!(mock.clicks().len(), 1);
}

#[tokio::test]
async fn stability_wait_never_errors() {
    let driver = MockDriver::new();
    let browser = driver.launch().await.unwrap();
    let context = browser.new_context().await.unwrap();
    let page = context.new_page().await.unwrap();

    let waited = stability::wait_for_dom_stability(
        &page,
        Duration::from_millis(50),
        Duration::from_millis(500),
    )
    .await;
    // The mock settles instantly; the call reports elapsed time either way.
    assert!(waited < 500);
}
