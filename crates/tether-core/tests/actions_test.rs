//! Primitive behaviour through the engine envelope: flaky-element retries,
//! input modes, batch fills, extraction, semantic actions, and assertions.

use futures::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_core::actions::{self, ExtractSchema, FieldSpec, FieldType, TypeMode};
use tether_core::config::RuntimeConfig;
use tether_core::engine::{execute_action, ActionOptions, Timeout};
use tether_core::error::AutomationError;
use tether_core::mock::{ClickEffect, MockDriver, MockElement, MockHub, MockPage};
use tether_core::selector::Selector;
use tether_core::session::BrowserSession;
use tether_core::Runtime;

struct Fixture {
    runtime: Arc<Runtime>,
    session: Arc<BrowserSession>,
    page: Arc<MockPage>,
    _hub: Arc<MockHub>,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new();
    let hub = driver.hub();
    let config = RuntimeConfig {
        profiles_dir: dir.path().join("profiles"),
        artifacts_dir: dir.path().join("artifacts"),
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::new(Arc::new(driver), config);
    let session = runtime.open_session(None, None).await.unwrap();
    let page = hub.last_page().unwrap();
    Fixture {
        runtime,
        session,
        page,
        _hub: hub,
        _dir: dir,
    }
}

#[tokio::test]
async fn click_retries_until_late_element_appears() {
    let f = fixture().await;
    f.page
        .add_element(MockElement::new("div").with_id("result").with_text(""));

    let page_for_task = Arc::clone(&f.page);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        page_for_task.add_element(
            MockElement::new("button")
                .with_id("late-btn")
                .on_click(ClickEffect::SetText {
                    selector: "#result".to_string(),
                    text: "button-clicked".to_string(),
                }),
        );
    });

    let cx = f.runtime.action_cx(&f.session);
    let result = actions::interact::click(
        &cx,
        Selector::from("#late-btn"),
        ActionOptions::default()
            .with_retries(5)
            .with_timeout(Timeout::Millis(500)),
    )
    .await;

    assert!(result.ok, "click failed: {:?}", result.error);
    assert!(result.retries > 0);
    assert_eq!(
        f.page.element_text("#result").as_deref(),
        Some("button-clicked")
    );
}

#[tokio::test]
async fn click_dedup_state_survives_across_attempts() {
    let f = fixture().await;
    let cx = f.runtime.action_cx(&f.session);

    // Attempt 0 records the click and fails; attempt 1 sees the recent
    // click and reports success without re-firing.
    let fired = Arc::new(AtomicU32::new(0));
    let fired_in_body = Arc::clone(&fired);
    let result = execute_action(
        &cx,
        "guarded-click",
        ActionOptions::default().with_retries(3),
        move |inv| {
            let fired = Arc::clone(&fired_in_body);
            async move {
                if inv.recently_clicked("#btn", Duration::from_secs(10)) {
                    return Ok(true);
                }
                fired.fetch_add(1, Ordering::SeqCst);
                inv.record_click("#btn");
                Err(AutomationError::AssertionFailed(
                    "no visible effect yet".into(),
                ))
            }
            .boxed()
        },
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.data, Some(true));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(result.retries, 1);
}

#[tokio::test]
async fn fill_mode_verifies_by_read_back() {
    let f = fixture().await;
    f.page
        .add_element(MockElement::new("input").with_id("q").with_attr("name", "q"));

    let cx = f.runtime.action_cx(&f.session);
    let result = actions::interact::type_text(
        &cx,
        Selector::from("#q"),
        "hello world",
        TypeMode::Fill,
        None,
        ActionOptions::default(),
    )
    .await;

    assert!(result.ok);
    assert!(result.data.unwrap().verified);
    assert_eq!(f.page.element_value("#q").as_deref(), Some("hello world"));
}

#[tokio::test]
async fn native_setter_and_paste_set_values_through_scripts() {
    let f = fixture().await;
    f.page.add_element(MockElement::new("input").with_id("a"));
    f.page.add_element(MockElement::new("input").with_id("b"));
    let cx = f.runtime.action_cx(&f.session);

    let native = actions::interact::type_text(
        &cx,
        Selector::from("#a"),
        "2024-06-01",
        TypeMode::NativeSetter,
        None,
        ActionOptions::default(),
    )
    .await;
    assert!(native.ok);
    assert_eq!(f.page.element_value("#a").as_deref(), Some("2024-06-01"));

    let pasted = actions::interact::type_text(
        &cx,
        Selector::from("#b"),
        "pasted text",
        TypeMode::Paste,
        None,
        ActionOptions::default(),
    )
    .await;
    assert!(pasted.ok);
    assert_eq!(f.page.element_value("#b").as_deref(), Some("pasted text"));
}

#[tokio::test]
async fn fill_form_batch_reports_and_retries_whole() {
    let f = fixture().await;
    f.page
        .add_element(MockElement::new("input").with_id("user"));
    f.page
        .add_element(MockElement::new("input").with_id("city"));
    let cx = f.runtime.action_cx(&f.session);

    let result = actions::interact::fill_fields(
        &cx,
        vec![
            (Selector::from("#user"), "amy".to_string()),
            (Selector::from("#city"), "Delft".to_string()),
        ],
        ActionOptions::default(),
    )
    .await;
    assert!(result.ok);
    let report = result.data.unwrap();
    assert_eq!(report.filled.len(), 2);
    assert!(report.failed.is_empty());

    // One missing entry fails the batch so the engine retries it whole.
    let failing = actions::interact::fill_fields(
        &cx,
        vec![
            (Selector::from("#user"), "amy".to_string()),
            (Selector::from("#missing"), "x".to_string()),
        ],
        ActionOptions::default()
            .with_retries(1)
            .with_timeout(Timeout::Millis(300)),
    )
    .await;
    assert!(!failing.ok);
    assert_eq!(failing.structured_error.unwrap().code, "ASSERTION_FAILED");
}

#[tokio::test]
async fn select_and_check_verify_state() {
    let f = fixture().await;
    f.page
        .add_element(MockElement::new("select").with_id("country"));
    f.page
        .add_element(MockElement::new("input").with_id("agree"));
    let cx = f.runtime.action_cx(&f.session);

    let selected = actions::interact::select_option(
        &cx,
        Selector::from("#country"),
        "NL",
        ActionOptions::default(),
    )
    .await;
    assert!(selected.ok);
    assert_eq!(selected.data.as_deref(), Some("NL"));

    let checked =
        actions::interact::set_checked(&cx, Selector::from("#agree"), true, ActionOptions::default())
            .await;
    assert!(checked.ok);
}

#[tokio::test]
async fn extraction_reads_text_maps_and_page_content() {
    let f = fixture().await;
    f.page.add_element(
        MockElement::new("h1")
            .with_id("title")
            .with_text("  Dashboard  "),
    );
    f.page.add_element(
        MockElement::new("a")
            .with_class("nav")
            .with_text("Home")
            .with_attr("href", "/home"),
    );
    f.page.add_element(
        MockElement::new("a")
            .with_class("nav")
            .with_text("Settings")
            .with_attr("href", "/settings"),
    );
    let cx = f.runtime.action_cx(&f.session);

    let text = actions::extract::get_text(&cx, Selector::from("#title"), ActionOptions::default())
        .await;
    assert_eq!(text.data.unwrap().as_deref(), Some("Dashboard"));

    let rows = actions::extract::get_all(
        &cx,
        Selector::from(".nav"),
        vec!["textContent".to_string(), "href".to_string()],
        None,
        ActionOptions::default(),
    )
    .await;
    let rows = rows.data.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["href"].as_deref(), Some("/home"));
    assert_eq!(rows[1]["textContent"].as_deref(), Some("Settings"));

    let content =
        actions::extract::get_page_content(&cx, ActionOptions::default()).await;
    let content = content.data.unwrap();
    assert!(content.contains("Dashboard"));
    assert!(content.contains("Settings"));
    assert!(!content.contains("  "));
}

#[tokio::test]
async fn structured_extract_with_provenance() {
    let f = fixture().await;
    for (id, name) in [("1", "Alpha"), ("2", "Beta"), ("3", "Gamma")] {
        f.page.add_element(
            MockElement::new("li")
                .with_class("item")
                .with_text(name)
                .with_attr("data-id", id),
        );
    }
    let cx = f.runtime.action_cx(&f.session);

    let mut schema = ExtractSchema::default();
    schema.fields.insert(
        "textContent".to_string(),
        FieldSpec {
            source: "textContent".to_string(),
            ty: FieldType::String,
        },
    );
    schema.fields.insert(
        "data-id".to_string(),
        FieldSpec {
            source: "data-id".to_string(),
            ty: FieldType::String,
        },
    );

    let result = actions::structured::extract_structured(
        &cx,
        Selector::from("li.item"),
        schema,
        None,
        ActionOptions::default(),
    )
    .await;
    assert!(result.ok);
    let rows = result.data.unwrap();
    assert_eq!(rows.data.len(), 3);
    assert_eq!(rows.provenance.len(), rows.data.len());
    assert_eq!(rows.data[0]["textContent"], Value::String("Alpha".into()));
    assert_eq!(rows.data[0]["data-id"], Value::String("1".into()));
    assert!(rows.provenance.iter().all(|p| p.tag_name == "li"));
}

#[tokio::test]
async fn structured_extract_rejects_rows_failing_the_schema() {
    let f = fixture().await;
    f.page.add_element(
        MockElement::new("li")
            .with_class("n")
            .with_text("10")
            .with_attr("data-rank", "1"),
    );
    f.page.add_element(
        MockElement::new("li")
            .with_class("n")
            .with_text("not-a-number")
            .with_attr("data-rank", "2"),
    );
    let cx = f.runtime.action_cx(&f.session);

    let mut schema = ExtractSchema::default();
    schema.fields.insert(
        "score".to_string(),
        FieldSpec {
            source: "textContent".to_string(),
            ty: FieldType::Integer,
        },
    );

    let result = actions::structured::extract_structured(
        &cx,
        Selector::from("li.n"),
        schema,
        None,
        ActionOptions::default(),
    )
    .await;
    let rows = result.data.unwrap();
    assert_eq!(rows.data.len(), 1);
    assert_eq!(rows.data[0]["score"], Value::from(10i64));
}

#[tokio::test]
async fn set_field_walks_the_candidate_chain() {
    let f = fixture().await;
    f.page.add_element(
        MockElement::new("input")
            .with_id("email-input")
            .with_attr("name", "email"),
    );
    // Identified only by placeholder.
    f.page.add_element(
        MockElement::new("input")
            .with_id("note-input")
            .with_attr("placeholder", "Add a note"),
    );
    let cx = f.runtime.action_cx(&f.session);

    let by_name = actions::semantic::set_field(
        &cx,
        "email",
        "amy@example.test",
        TypeMode::Fill,
        None,
        ActionOptions::default(),
    )
    .await;
    assert!(by_name.ok);
    assert_eq!(
        f.page.element_value("#email-input").as_deref(),
        Some("amy@example.test")
    );

    let by_placeholder = actions::semantic::set_field(
        &cx,
        "Add a note",
        "remember the milk",
        TypeMode::Fill,
        None,
        ActionOptions::default(),
    )
    .await;
    assert!(by_placeholder.ok);
    assert_eq!(
        f.page.element_value("#note-input").as_deref(),
        Some("remember the milk")
    );
}

#[tokio::test]
async fn submit_form_clicks_the_submit_affordance() {
    let f = fixture().await;
    f.page.add_element(
        MockElement::new("button")
            .with_id("go")
            .with_attr("type", "submit")
            .with_text("Send"),
    );
    let cx = f.runtime.action_cx(&f.session);

    let result =
        actions::semantic::submit_form(&cx, None, ActionOptions::default()).await;
    assert!(result.ok);
    assert_eq!(f.page.clicks(), vec!["#go".to_string()]);
}

#[tokio::test]
async fn set_date_field_presses_and_verifies() {
    let f = fixture().await;
    f.page.add_element(
        MockElement::new("input")
            .with_id("when")
            .with_attr("type", "date"),
    );
    let cx = f.runtime.action_cx(&f.session);

    let result = actions::semantic::set_date_field(
        &cx,
        Selector::from("#when"),
        "2026-08-02",
        ActionOptions::default(),
    )
    .await;
    assert!(result.ok);
    assert_eq!(f.page.element_value("#when").as_deref(), Some("2026-08-02"));
    let pressed = f.page.pressed_keys();
    assert!(pressed.contains(&"Enter".to_string()));
    assert!(pressed.contains(&"Escape".to_string()));
}

#[tokio::test]
async fn assertions_note_checks_and_gate_actions() {
    let f = fixture().await;
    f.page
        .add_element(MockElement::new("div").with_id("banner").with_text("Saved"));
    let cx = f.runtime.action_cx(&f.session);

    let predicate = actions::assert::all_of(vec![
        actions::assert::assert_element_visible(Selector::from("#banner")),
        actions::assert::assert_element_text(
            Selector::from("#banner"),
            actions::assert::TextMatch::Contains("Saved".to_string()),
        ),
    ]);
    let options = ActionOptions::default().with_postcondition(predicate);
    let result = execute_action(&cx, "checked-noop", options, move |_inv| {
        async move { Ok::<_, AutomationError>(()) }.boxed()
    })
    .await;
    assert!(result.ok);

    let entries = f.runtime.trace().session_trace(f.session.id());
    let checked = entries[0].assertions_checked.as_ref().unwrap();
    assert_eq!(checked.len(), 2);
    assert!(checked.iter().all(|a| a.passed));
}

#[tokio::test]
async fn wait_primitives_record_waits() {
    let f = fixture().await;
    let cx = f.runtime.action_cx(&f.session);

    let page_for_task = Arc::clone(&f.page);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        page_for_task.add_element(MockElement::new("div").with_id("ready"));
    });
    let outcome = actions::wait::wait_for_selector(
        &cx,
        Selector::from("#ready"),
        tether_core::driver::WaitState::Visible,
        ActionOptions::default(),
    )
    .await;
    assert!(outcome.ok);
    assert!(outcome.data.unwrap().satisfied);

    f.page.program_eval("window.__done", Value::Bool(true));
    let condition = actions::wait::wait_for_condition(
        &cx,
        "window.__done === true",
        ActionOptions::default().with_timeout(Timeout::Millis(2000)),
    )
    .await;
    assert!(condition.ok);

    let entries = f.runtime.trace().session_trace(f.session.id());
    assert!(entries
        .iter()
        .all(|entry| entry.waits_performed.as_ref().is_some_and(|w| !w.is_empty())));
}

#[tokio::test]
async fn assert_element_gone_passes_once_removed() {
    let f = fixture().await;
    f.page
        .add_element(MockElement::new("div").with_id("spinner"));
    let cx = f.runtime.action_cx(&f.session);

    let gone = actions::assert::assert_element_gone(Selector::from("#spinner"));
    let options = ActionOptions::default()
        .with_retries(3)
        .with_timeout(Timeout::Millis(3000))
        .with_postcondition(gone);

    let page_for_task = Arc::clone(&f.page);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        page_for_task.remove_matching("#spinner");
    });

    let result = execute_action(&cx, "await-spinner", options, move |_inv| {
        async move { Ok::<_, AutomationError>(()) }.boxed()
    })
    .await;
    assert!(result.ok, "spinner never went away: {:?}", result.error);
}
