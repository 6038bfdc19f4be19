//! Tool-surface behaviour: dispatch, argument validation, logging with
//! redaction, handles, and the approval cascade.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tether_core::config::{RedactionSettings, RuntimeConfig};
use tether_core::mock::{MockDriver, MockElement, MockHub};
use tether_core::Runtime;
use tether_tools::{ApprovalError, ApprovalProvider, BrowserToolset, ToolError};

struct Fixture {
    tools: BrowserToolset,
    hub: Arc<MockHub>,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

async fn fixture_with(tweak: impl FnOnce(&mut RuntimeConfig)) -> Fixture {
    tether_core::logging::init();
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new();
    let hub = driver.hub();
    let mut config = RuntimeConfig {
        profiles_dir: dir.path().join("profiles"),
        artifacts_dir: dir.path().join("artifacts"),
        ..RuntimeConfig::default()
    };
    tweak(&mut config);
    let runtime = Runtime::new(Arc::new(driver), config);
    Fixture {
        tools: BrowserToolset::new(runtime),
        hub,
        _dir: dir,
    }
}

async fn open_session(f: &Fixture) -> String {
    let output = f.tools.execute("browser_open", json!({})).await.unwrap();
    output.details["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn surface_advertises_twenty_six_tools() {
    let f = fixture().await;
    let definitions = f.tools.definitions();
    assert_eq!(definitions.len(), 26);
    assert!(definitions.iter().all(|d| d.name.starts_with("browser_")));
    let spec = definitions[0].to_spec();
    assert_eq!(spec["name"], "browser_open");
    assert!(spec["input_schema"].is_object());
}

#[tokio::test]
async fn open_list_close_round_trip() {
    let f = fixture().await;
    let session_id = open_session(&f).await;

    let list = f.tools.execute("browser_list", json!({})).await.unwrap();
    let sessions = list.details["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["sessionId"].as_str().unwrap(), session_id);
    assert_eq!(sessions[0]["healthy"], Value::Bool(true));

    f.tools
        .execute("browser_close", json!({ "sessionId": session_id }))
        .await
        .unwrap();
    let list = f.tools.execute("browser_list", json!({})).await.unwrap();
    assert!(list.details["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn click_and_trace_through_the_surface() {
    let f = fixture().await;
    let session_id = open_session(&f).await;
    let page = f.hub.last_page().unwrap();
    page.add_element(MockElement::new("button").with_id("go").with_text("Go"));

    let output = f
        .tools
        .execute(
            "browser_click",
            json!({ "sessionId": session_id, "selector": "#go" }),
        )
        .await
        .unwrap();
    assert_eq!(output.details["ok"], Value::Bool(true));
    assert_eq!(page.clicks(), vec!["#go".to_string()]);

    let trace = f
        .tools
        .execute("browser_session_trace", json!({ "sessionId": session_id }))
        .await
        .unwrap();
    let entries = trace.details["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "click");
    assert_eq!(trace.details["stats"]["ok"], json!(1));
}

#[tokio::test]
async fn wait_requires_exactly_one_of_selector_or_condition() {
    let f = fixture().await;
    let session_id = open_session(&f).await;

    let both = f
        .tools
        .execute(
            "browser_wait",
            json!({ "sessionId": session_id, "selector": "#x", "condition": "true" }),
        )
        .await;
    assert!(matches!(both, Err(ToolError::InvalidArguments(_))));

    let neither = f
        .tools
        .execute("browser_wait", json!({ "sessionId": session_id }))
        .await;
    assert!(matches!(neither, Err(ToolError::InvalidArguments(_))));
}

#[tokio::test]
async fn typed_text_is_redacted_in_the_action_log() {
    let f = fixture_with(|config| {
        config.redaction = RedactionSettings {
            sensitive_keys: vec![],
            redact_typed_text: true,
        };
    })
    .await;
    let session_id = open_session(&f).await;
    let page = f.hub.last_page().unwrap();
    page.add_element(MockElement::new("input").with_id("pw"));

    f.tools
        .execute(
            "browser_type",
            json!({ "sessionId": session_id, "selector": "#pw", "text": "hunter2" }),
        )
        .await
        .unwrap();

    let entries = f
        .tools
        .runtime()
        .action_log()
        .by_session(&session_id, 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    let input = entries[0].input.as_ref().unwrap();
    assert_eq!(input["text"], "[REDACTED]");
    assert_eq!(input["selector"], "#pw");
    // The value itself landed on the page unredacted.
    assert_eq!(page.element_value("#pw").as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn failed_tools_throw_with_the_structured_code() {
    let f = fixture().await;
    let session_id = open_session(&f).await;

    let err = f
        .tools
        .execute(
            "browser_click",
            json!({
                "sessionId": session_id,
                "selector": "#absent",
                "retries": 0,
                "timeout": 200,
            }),
        )
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("TARGET_NOT_FOUND") || message.contains("TIMEOUT_EXCEEDED"),
        "got: {message}"
    );

    // The failure was still logged.
    let failures = f
        .tools
        .runtime()
        .action_log()
        .failures_by_session(&session_id)
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn handle_tools_register_resolve_release() {
    let f = fixture().await;
    let session_id = open_session(&f).await;
    let page = f.hub.last_page().unwrap();
    page.add_element(
        MockElement::new("button")
            .with_id("btn")
            .with_test_id("action-btn"),
    );

    let registered = f
        .tools
        .execute(
            "browser_register_element",
            json!({
                "sessionId": session_id,
                "selector": [
                    { "kind": "css", "selector": "#btn" },
                    { "kind": "test_id", "id": "action-btn" },
                ],
            }),
        )
        .await
        .unwrap();
    let handle_id = registered.details["handleId"].as_str().unwrap().to_string();
    assert_eq!(registered.details["remapCount"], json!(0));

    page.set_attr("[data-testid='action-btn']", "id", None);
    let resolved = f
        .tools
        .execute(
            "browser_resolve_element",
            json!({ "sessionId": session_id, "handleId": handle_id }),
        )
        .await
        .unwrap();
    assert_eq!(resolved.details["remapped"], Value::Bool(true));
    assert_eq!(resolved.details["remapCount"], json!(1));

    f.tools
        .execute(
            "browser_release_element",
            json!({ "sessionId": session_id, "handleId": handle_id }),
        )
        .await
        .unwrap();
    let gone = f
        .tools
        .execute(
            "browser_resolve_element",
            json!({ "sessionId": session_id, "handleId": handle_id }),
        )
        .await;
    assert!(gone.is_err());
}

#[tokio::test]
async fn semantic_tools_fill_and_submit() {
    let f = fixture().await;
    let session_id = open_session(&f).await;
    let page = f.hub.last_page().unwrap();
    page.add_element(
        MockElement::new("input")
            .with_id("q")
            .with_attr("name", "query"),
    );
    page.add_element(
        MockElement::new("button")
            .with_id("find")
            .with_attr("type", "submit"),
    );

    f.tools
        .execute(
            "browser_set_field",
            json!({ "sessionId": session_id, "identifier": "query", "value": "rust" }),
        )
        .await
        .unwrap();
    assert_eq!(page.element_value("#q").as_deref(), Some("rust"));

    f.tools
        .execute("browser_submit_form", json!({ "sessionId": session_id }))
        .await
        .unwrap();
    assert!(page.clicks().contains(&"#find".to_string()));
}

#[tokio::test]
async fn extract_structured_through_the_surface() {
    let f = fixture().await;
    let session_id = open_session(&f).await;
    let page = f.hub.last_page().unwrap();
    for (id, name) in [("1", "Alpha"), ("2", "Beta"), ("3", "Gamma")] {
        page.add_element(
            MockElement::new("li")
                .with_class("row")
                .with_text(name)
                .with_attr("data-id", id),
        );
    }

    let output = f
        .tools
        .execute(
            "browser_extract_structured",
            json!({
                "sessionId": session_id,
                "selector": "li.row",
                "fields": { "textContent": "textContent", "data-id": "data-id" },
            }),
        )
        .await
        .unwrap();
    let data = output.details["data"]["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data[0]["textContent"], "Alpha");
    let provenance = output.details["data"]["provenance"].as_array().unwrap();
    assert_eq!(provenance.len(), 3);
    assert!(provenance.iter().all(|p| p["tag_name"] == "li"));
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let f = fixture().await;
    let err = f
        .tools
        .execute("browser_teleport", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::UnknownTool(_)));
}

struct DenyAll;

#[async_trait]
impl ApprovalProvider for DenyAll {
    async fn approve(&self, _: &str, _: &str) -> Result<bool, ApprovalError> {
        Ok(false)
    }
}

#[tokio::test]
async fn approval_tool_resolves_the_cascade() {
    let f = fixture_with(|config| {
        config.auto_approve = Some(true);
    })
    .await;
    let session_id = open_session(&f).await;

    // Configured auto_approve wins when no provider is injected.
    let output = f
        .tools
        .execute(
            "browser_request_approval",
            json!({ "sessionId": session_id, "message": "purchase?" }),
        )
        .await
        .unwrap();
    assert_eq!(output.details["approved"], Value::Bool(true));

    // An injected provider overrides the configuration.
    let denied = fixture_with(|config| {
        config.auto_approve = Some(true);
    })
    .await;
    let tools = BrowserToolset::new(Arc::clone(denied.tools.runtime()))
        .with_approval_provider(Arc::new(DenyAll));
    let session_id = {
        let output = tools.execute("browser_open", json!({})).await.unwrap();
        output.details["sessionId"].as_str().unwrap().to_string()
    };
    let output = tools
        .execute(
            "browser_request_approval",
            json!({ "sessionId": session_id, "message": "purchase?" }),
        )
        .await
        .unwrap();
    assert_eq!(output.details["approved"], Value::Bool(false));
}
