//! The agent-facing tool surface: 26 `browser_*` tools mapped onto the
//! engine primitives. Every tool takes a JSON object, returns
//! `{content, details}`, and fails with a `ToolError` on unrecoverable
//! failure. Action tools are appended to the action log with their input
//! sanitised.

use crate::approval::{resolve_approval, ApprovalProvider};
use crate::tool::{ToolDefinition, ToolError, ToolOutput};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tether_core::actions::{
    self, ExtractSchema, FieldSpec, FieldType, ScrollDirection, TypeMode,
};
use tether_core::driver::WaitState;
use tether_core::engine::{ActionOptions, ActionResult, Timeout};
use tether_core::{Runtime, Selector, SelectorStrategy};

const HANDLE_BUDGET: Duration = Duration::from_secs(15);

pub struct BrowserToolset {
    runtime: Arc<Runtime>,
    approval: Option<Arc<dyn ApprovalProvider>>,
}

impl BrowserToolset {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            approval: None,
        }
    }

    pub fn with_approval_provider(mut self, provider: Arc<dyn ApprovalProvider>) -> Self {
        self.approval = Some(provider);
        self
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Every tool this surface advertises.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let selector_schema = json!({
            "description": "CSS string, one strategy object, or an ordered fallback chain",
        });
        vec![
            // --- session ---
            ToolDefinition::new(
                "browser_open",
                "Open a browser session, optionally restoring a named profile and navigating",
                json!({"type": "object", "properties": {
                    "url": {"type": "string"},
                    "profile": {"type": "string"}
                }}),
            ),
            ToolDefinition::new(
                "browser_close",
                "Close a session, persisting its profile snapshot first",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"}
                }, "required": ["sessionId"]}),
            ),
            ToolDefinition::new(
                "browser_list",
                "List live sessions",
                json!({"type": "object", "properties": {}}),
            ),
            ToolDefinition::new(
                "browser_restore",
                "Restore a session from its profile's stored snapshot",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"}
                }, "required": ["sessionId"]}),
            ),
            ToolDefinition::new(
                "browser_state",
                "Current page state: url, title, readyState, loading flag",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"}
                }, "required": ["sessionId"]}),
            ),
            // --- actions ---
            ToolDefinition::new(
                "browser_navigate",
                "Navigate the session to a URL",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "url": {"type": "string"},
                    "timeout": {"description": "short | medium | long | milliseconds"}
                }, "required": ["sessionId", "url"]}),
            ),
            ToolDefinition::new(
                "browser_click",
                "Click an element; duplicate clicks within 500ms are suppressed",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "selector": selector_schema,
                    "retries": {"type": "integer"},
                    "timeout": {}
                }, "required": ["sessionId", "selector"]}),
            ),
            ToolDefinition::new(
                "browser_type",
                "Type into an element. Modes: fill (verified), sequential, paste, native_setter",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "selector": selector_schema,
                    "text": {"type": "string"},
                    "mode": {"type": "string", "enum": ["fill", "sequential", "paste", "native_setter"]},
                    "delayMs": {"type": "integer"}
                }, "required": ["sessionId", "selector", "text"]}),
            ),
            ToolDefinition::new(
                "browser_select",
                "Select an option by value, verified by read-back",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "selector": selector_schema,
                    "value": {"type": "string"}
                }, "required": ["sessionId", "selector", "value"]}),
            ),
            ToolDefinition::new(
                "browser_fill_form",
                "Fill several fields; the whole batch retries if any entry fails",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "fields": {"type": "object", "description": "selector -> value"}
                }, "required": ["sessionId", "fields"]}),
            ),
            ToolDefinition::new(
                "browser_extract_text",
                "Text content of the first matching element",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "selector": selector_schema
                }, "required": ["sessionId", "selector"]}),
            ),
            ToolDefinition::new(
                "browser_extract_all",
                "Per-element maps of textContent/innerHTML/attributes across all matches",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "selector": selector_schema,
                    "keys": {"type": "array", "items": {"type": "string"}},
                    "limit": {"type": "integer"}
                }, "required": ["sessionId", "selector"]}),
            ),
            ToolDefinition::new(
                "browser_extract_structured",
                "Schema-driven extraction with provenance; fields map output keys to textContent/innerHTML/attributes",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "selector": selector_schema,
                    "fields": {"type": "object"},
                    "limit": {"type": "integer"}
                }, "required": ["sessionId", "selector", "fields"]}),
            ),
            ToolDefinition::new(
                "browser_wait",
                "Wait for a selector state or a page condition (exactly one of selector/condition)",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "selector": selector_schema,
                    "condition": {"type": "string"},
                    "state": {"type": "string", "enum": ["visible", "hidden", "attached", "detached"]},
                    "timeout": {}
                }, "required": ["sessionId"]}),
            ),
            ToolDefinition::new(
                "browser_get_content",
                "Readable page text with script/style/noscript/svg stripped",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"}
                }, "required": ["sessionId"]}),
            ),
            // --- page ---
            ToolDefinition::new(
                "browser_screenshot",
                "Capture a screenshot into the artifact directory",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "label": {"type": "string"},
                    "fullPage": {"type": "boolean"}
                }, "required": ["sessionId"]}),
            ),
            ToolDefinition::new(
                "browser_evaluate",
                "Evaluate a script in the page and return its JSON value",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "script": {"type": "string"}
                }, "required": ["sessionId", "script"]}),
            ),
            ToolDefinition::new(
                "browser_scroll",
                "Scroll the window",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "direction": {"type": "string", "enum": ["up", "down", "left", "right", "top", "bottom"]},
                    "amount": {"type": "integer"}
                }, "required": ["sessionId", "direction"]}),
            ),
            ToolDefinition::new(
                "browser_session_trace",
                "Retained trace entries and aggregate stats for one session",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"}
                }, "required": ["sessionId"]}),
            ),
            // --- handles ---
            ToolDefinition::new(
                "browser_register_element",
                "Register a stable handle over a selector",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "selector": selector_schema
                }, "required": ["sessionId", "selector"]}),
            ),
            ToolDefinition::new(
                "browser_resolve_element",
                "Re-resolve a handle; reports remapping when a different strategy wins",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "handleId": {"type": "string"},
                    "state": {"type": "string"}
                }, "required": ["sessionId", "handleId"]}),
            ),
            ToolDefinition::new(
                "browser_release_element",
                "Release a handle",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "handleId": {"type": "string"}
                }, "required": ["sessionId", "handleId"]}),
            ),
            // --- semantic ---
            ToolDefinition::new(
                "browser_set_field",
                "Set a form field by identifier (name, placeholder, aria-label, or label)",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "identifier": {"type": "string"},
                    "value": {"type": "string"},
                    "mode": {"type": "string"},
                    "scope": {"type": "string"}
                }, "required": ["sessionId", "identifier", "value"]}),
            ),
            ToolDefinition::new(
                "browser_submit_form",
                "Click the form's submit affordance",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "scope": {"type": "string"}
                }, "required": ["sessionId"]}),
            ),
            ToolDefinition::new(
                "browser_apply_filter",
                "Set a filter field then click apply (unless skipApply)",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "identifier": {"type": "string"},
                    "value": {"type": "string"},
                    "applySelector": selector_schema,
                    "skipApply": {"type": "boolean"},
                    "scope": {"type": "string"}
                }, "required": ["sessionId", "identifier", "value"]}),
            ),
            // --- approval ---
            ToolDefinition::new(
                "browser_request_approval",
                "Ask for approval; resolves provider, then auto_approve config, then BROWSER_AUTO_APPROVE",
                json!({"type": "object", "properties": {
                    "sessionId": {"type": "string"},
                    "message": {"type": "string"}
                }, "required": ["sessionId", "message"]}),
            ),
        ]
    }

    /// Dispatch one tool call.
    pub async fn execute(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        match name {
            "browser_open" => self.open(args).await,
            "browser_close" => self.close(args).await,
            "browser_list" => self.list().await,
            "browser_restore" => self.restore(args).await,
            "browser_state" => self.state(args).await,
            "browser_navigate" => self.navigate(args).await,
            "browser_click" => self.click(args).await,
            "browser_type" => self.type_text(args).await,
            "browser_select" => self.select(args).await,
            "browser_fill_form" => self.fill_form(args).await,
            "browser_extract_text" => self.extract_text(args).await,
            "browser_extract_all" => self.extract_all(args).await,
            "browser_extract_structured" => self.extract_structured(args).await,
            "browser_wait" => self.wait(args).await,
            "browser_get_content" => self.get_content(args).await,
            "browser_screenshot" => self.screenshot(args).await,
            "browser_evaluate" => self.evaluate(args).await,
            "browser_scroll" => self.scroll(args).await,
            "browser_session_trace" => self.session_trace(args).await,
            "browser_register_element" => self.register_element(args).await,
            "browser_resolve_element" => self.resolve_element(args).await,
            "browser_release_element" => self.release_element(args).await,
            "browser_set_field" => self.set_field(args).await,
            "browser_submit_form" => self.submit_form(args).await,
            "browser_apply_filter" => self.apply_filter(args).await,
            "browser_request_approval" => self.request_approval(args).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    // --- session tools ---

    async fn open(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let profile = opt_str(&args, "profile");
        let url = opt_str(&args, "url");
        let session = self.runtime.open_session(profile, url).await?;
        Ok(ToolOutput::text(
            format!("Opened session {}", session.id()),
            json!({
                "sessionId": session.id(),
                "url": session.current_url(),
                "profile": session.profile(),
            }),
        ))
    }

    async fn close(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        self.runtime.close_session(&session_id).await?;
        Ok(ToolOutput::text(
            format!("Closed session {session_id}"),
            json!({ "sessionId": session_id }),
        ))
    }

    async fn list(&self) -> Result<ToolOutput, ToolError> {
        let pool = self.runtime.pool();
        let sessions: Vec<Value> = pool
            .session_ids()
            .into_iter()
            .filter_map(|id| pool.get_session(&id))
            .map(|session| {
                json!({
                    "sessionId": session.id(),
                    "url": session.current_url(),
                    "profile": session.profile(),
                    "healthy": session.healthy(),
                })
            })
            .collect();
        Ok(ToolOutput::text(
            format!("{} active session(s)", sessions.len()),
            json!({ "sessions": sessions }),
        ))
    }

    async fn restore(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        self.runtime.pool().restore_from_profile(&session_id).await?;
        let session = self.runtime.session(&session_id)?;
        Ok(ToolOutput::text(
            format!("Restored session {session_id}"),
            json!({ "sessionId": session_id, "url": session.current_url() }),
        ))
    }

    async fn state(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result = actions::capture::get_page_state(&cx, options_from(&args)).await;
        self.finish(&session_id, "get_page_state", None, args, result, |state| {
            format!("{} ({})", state.url, state.ready_state)
        })
        .await
    }

    // --- action tools ---

    async fn navigate(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let url = require_str(&args, "url")?;
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result = actions::nav::navigate(&cx, &url, options_from(&args)).await;
        self.finish(&session_id, "navigate", None, args, result, |nav| {
            format!("Navigated to {}", nav.url)
        })
        .await
    }

    async fn click(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let selector = require_selector(&args)?;
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let label = selector.key();
        let result = actions::interact::click(&cx, selector, options_from(&args)).await;
        self.finish(&session_id, "click", Some(label), args, result, |outcome| {
            if outcome.skipped_duplicate {
                "Click suppressed as duplicate".to_string()
            } else {
                "Clicked".to_string()
            }
        })
        .await
    }

    async fn type_text(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let selector = require_selector(&args)?;
        let text = require_str(&args, "text")?;
        let mode = match opt_str(&args, "mode") {
            Some(raw) => parse_mode(&raw)?,
            None => TypeMode::Fill,
        };
        let delay = args
            .get("delayMs")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let label = selector.key();
        let result =
            actions::interact::type_text(&cx, selector, &text, mode, delay, options_from(&args))
                .await;
        self.finish(&session_id, "type", Some(label), args, result, |outcome| {
            format!("Typed via {:?}", outcome.mode)
        })
        .await
    }

    async fn select(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let selector = require_selector(&args)?;
        let value = require_str(&args, "value")?;
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let label = selector.key();
        let result =
            actions::interact::select_option(&cx, selector, &value, options_from(&args)).await;
        self.finish(&session_id, "select", Some(label), args, result, |selected| {
            format!("Selected {selected}")
        })
        .await
    }

    async fn fill_form(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let fields_value = args
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| ToolError::InvalidArguments("fields object is required".into()))?;
        // Deterministic order so retries walk the form the same way.
        let fields: Vec<(Selector, String)> = fields_value
            .iter()
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .map(|(selector, value)| {
                (
                    Selector::Css(selector.clone()),
                    value.as_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result = actions::interact::fill_fields(&cx, fields, options_from(&args)).await;
        self.finish(&session_id, "fill_form", None, args, result, |report| {
            format!("Filled {} field(s)", report.filled.len())
        })
        .await
    }

    async fn extract_text(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let selector = require_selector(&args)?;
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let label = selector.key();
        let result = actions::extract::get_text(&cx, selector, options_from(&args)).await;
        self.finish(&session_id, "extract_text", Some(label), args, result, |text| {
            text.clone().unwrap_or_default()
        })
        .await
    }

    async fn extract_all(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let selector = require_selector(&args)?;
        let keys: Vec<String> = args
            .get("keys")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec!["textContent".to_string()]);
        let limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let label = selector.key();
        let result =
            actions::extract::get_all(&cx, selector, keys, limit, options_from(&args)).await;
        self.finish(&session_id, "extract_all", Some(label), args, result, |rows| {
            format!("{} element(s)", rows.len())
        })
        .await
    }

    async fn extract_structured(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let selector = require_selector(&args)?;
        let schema = parse_schema(&args)?;
        let limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let label = selector.key();
        let result = actions::structured::extract_structured(
            &cx,
            selector,
            schema,
            limit,
            options_from(&args),
        )
        .await;
        self.finish(&session_id, "extract_structured", Some(label), args, result, |rows| {
            format!("{} row(s)", rows.data.len())
        })
        .await
    }

    async fn wait(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let selector = args.get("selector");
        let condition = opt_str(&args, "condition");
        // Exactly one of selector/condition.
        if selector.is_some() == condition.is_some() {
            return Err(ToolError::InvalidArguments(
                "wait requires exactly one of selector or condition".into(),
            ));
        }
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);

        if let Some(selector) = selector {
            let selector = parse_selector(selector)?;
            let state = parse_state(opt_str(&args, "state").as_deref())?;
            let label = selector.key();
            let result =
                actions::wait::wait_for_selector(&cx, selector, state, options_from(&args)).await;
            self.finish(&session_id, "wait", Some(label), args, result, |outcome| {
                format!("Satisfied after {}ms", outcome.waited_ms)
            })
            .await
        } else {
            let condition = condition.unwrap_or_default();
            let result =
                actions::wait::wait_for_condition(&cx, &condition, options_from(&args)).await;
            self.finish(&session_id, "wait", None, args, result, |outcome| {
                format!("Satisfied after {}ms", outcome.waited_ms)
            })
            .await
        }
    }

    async fn get_content(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result = actions::extract::get_page_content(&cx, options_from(&args)).await;
        self.finish(&session_id, "get_content", None, args, result, |text| {
            let mut preview = text.clone();
            preview.truncate(200);
            preview
        })
        .await
    }

    // --- page tools ---

    async fn screenshot(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let label = opt_str(&args, "label");
        let full_page = args
            .get("fullPage")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result =
            actions::capture::screenshot(&cx, label.as_deref(), full_page, options_from(&args))
                .await;
        self.finish(&session_id, "screenshot", None, args, result, |path| {
            format!("Saved {}", path.display())
        })
        .await
    }

    async fn evaluate(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let script = require_str(&args, "script")?;
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result = actions::capture::evaluate(&cx, &script, options_from(&args)).await;
        self.finish(&session_id, "evaluate", None, args, result, |value| {
            value.to_string()
        })
        .await
    }

    async fn scroll(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let direction = require_str(&args, "direction")?;
        let direction: ScrollDirection = serde_json::from_value(Value::String(direction))
            .map_err(|err| ToolError::InvalidArguments(format!("direction: {err}")))?;
        let amount = args.get("amount").and_then(Value::as_i64);
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result = actions::capture::scroll(&cx, direction, amount, options_from(&args)).await;
        self.finish(&session_id, "scroll", None, args, result, |_| {
            "Scrolled".to_string()
        })
        .await
    }

    async fn session_trace(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let entries = self.runtime.trace().session_trace(&session_id);
        let stats = self.runtime.trace().stats();
        Ok(ToolOutput::text(
            format!("{} trace entr(ies)", entries.len()),
            json!({ "entries": entries, "stats": stats }),
        ))
    }

    // --- handle tools ---

    async fn register_element(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let selector = require_selector(&args)?;
        let session = self.runtime.session(&session_id)?;
        let handle = session
            .handles()
            .register(&session.page(), selector, HANDLE_BUDGET)
            .await?;
        Ok(ToolOutput::text(
            format!("Registered handle {}", handle.handle_id),
            json!({
                "handleId": handle.handle_id,
                "strategy": handle.last_winning.describe(),
                "remapCount": handle.remap_count,
            }),
        ))
    }

    async fn resolve_element(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let handle_id = require_str(&args, "handleId")?;
        let state = parse_state(opt_str(&args, "state").as_deref())?;
        let session = self.runtime.session(&session_id)?;
        let resolved = session
            .handles()
            .resolve(&session.page(), &handle_id, state, HANDLE_BUDGET)
            .await?;
        let meta = resolved.resolution.meta();
        Ok(ToolOutput::text(
            if resolved.remapped {
                format!("Resolved {handle_id} (remapped to {})", meta.strategy)
            } else {
                format!("Resolved {handle_id}")
            },
            json!({
                "handleId": handle_id,
                "remapped": resolved.remapped,
                "remapCount": resolved.remap_count,
                "strategy": meta.strategy,
                "strategyIndex": meta.strategy_index,
                "resolutionMs": meta.resolution_ms,
                "chainLength": meta.chain_length,
            }),
        ))
    }

    async fn release_element(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let handle_id = require_str(&args, "handleId")?;
        let session = self.runtime.session(&session_id)?;
        let released = session.handles().release(&handle_id);
        if !released {
            return Err(ToolError::Execution(format!("unknown handle: {handle_id}")));
        }
        Ok(ToolOutput::text(
            format!("Released handle {handle_id}"),
            json!({ "handleId": handle_id }),
        ))
    }

    // --- semantic tools ---

    async fn set_field(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let identifier = require_str(&args, "identifier")?;
        let value = require_str(&args, "value")?;
        let mode = match opt_str(&args, "mode") {
            Some(raw) => parse_mode(&raw)?,
            None => TypeMode::Fill,
        };
        let scope = opt_str(&args, "scope");
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result = actions::semantic::set_field(
            &cx,
            &identifier,
            &value,
            mode,
            scope.as_deref(),
            options_from(&args),
        )
        .await;
        self.finish(&session_id, "set_field", Some(format!("field:{identifier}")), args, result, |outcome| {
            format!("Set via {}", outcome.matched)
        })
        .await
    }

    async fn submit_form(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let scope = opt_str(&args, "scope");
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result =
            actions::semantic::submit_form(&cx, scope.as_deref(), options_from(&args)).await;
        self.finish(&session_id, "submit_form", None, args, result, |outcome| {
            format!("Submitted via {}", outcome.matched)
        })
        .await
    }

    async fn apply_filter(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let identifier = require_str(&args, "identifier")?;
        let value = require_str(&args, "value")?;
        let apply_selector = match args.get("applySelector") {
            Some(value) => Some(parse_selector(value)?),
            None => None,
        };
        let skip_apply = args
            .get("skipApply")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let scope = opt_str(&args, "scope");
        let session = self.runtime.session(&session_id)?;
        let cx = self.runtime.action_cx(&session);
        let result = actions::semantic::apply_filter(
            &cx,
            &identifier,
            &value,
            apply_selector,
            skip_apply,
            scope.as_deref(),
            options_from(&args),
        )
        .await;
        self.finish(&session_id, "apply_filter", Some(format!("filter:{identifier}")), args, result, |outcome| {
            format!("Filtered via {}", outcome.matched)
        })
        .await
    }

    // --- approval ---

    async fn request_approval(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let session_id = require_str(&args, "sessionId")?;
        let message = require_str(&args, "message")?;
        let approved = resolve_approval(
            self.approval.as_ref(),
            self.runtime.config().auto_approve,
            &session_id,
            &message,
        )
        .await;
        Ok(ToolOutput::text(
            if approved { "Approved" } else { "Denied" },
            json!({ "approved": approved, "message": message }),
        ))
    }

    /// Log the action and turn an engine result into a tool output; an
    /// exhausted action surfaces as a thrown `ToolError` carrying the last
    /// error message.
    async fn finish<T: Serialize>(
        &self,
        session_id: &str,
        action: &str,
        selector: Option<String>,
        input: Value,
        result: ActionResult<T>,
        summary: impl FnOnce(&T) -> String,
    ) -> Result<ToolOutput, ToolError> {
        let screenshot_path = result
            .screenshot
            .as_ref()
            .map(|p| p.display().to_string());
        let log_result = json!({
            "ok": result.ok,
            "retries": result.retries,
            "durationMs": result.duration_ms,
            "error": result.error,
        });
        self.runtime
            .record_action(
                session_id,
                action,
                selector,
                Some(input),
                log_result,
                screenshot_path.clone(),
                result.duration_ms,
                result.retries,
            )
            .await;

        if result.ok {
            let text = result
                .data
                .as_ref()
                .map(summary)
                .unwrap_or_else(|| action.to_string());
            let data = result
                .data
                .as_ref()
                .and_then(|data| serde_json::to_value(data).ok())
                .unwrap_or(Value::Null);
            let details = json!({
                "ok": true,
                "data": data,
                "retries": result.retries,
                "durationMs": result.duration_ms,
            });
            Ok(ToolOutput::text(text, details))
        } else {
            let message = result
                .error
                .unwrap_or_else(|| format!("{action} failed"));
            Err(ToolError::Execution(match &result.structured_error {
                Some(structured) => format!("[{}] {message}", structured.code),
                None => message,
            }))
        }
    }
}

// --- argument helpers ---

fn require_str(args: &Value, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("{key} is required")))
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn require_selector(args: &Value) -> Result<Selector, ToolError> {
    let value = args
        .get("selector")
        .ok_or_else(|| ToolError::InvalidArguments("selector is required".into()))?;
    parse_selector(value)
}

fn parse_selector(value: &Value) -> Result<Selector, ToolError> {
    match value {
        Value::String(css) => Ok(Selector::Css(css.clone())),
        Value::Array(_) => serde_json::from_value::<Vec<SelectorStrategy>>(value.clone())
            .map(Selector::Chain)
            .map_err(|err| ToolError::InvalidArguments(format!("selector chain: {err}"))),
        Value::Object(_) => serde_json::from_value::<SelectorStrategy>(value.clone())
            .map(Selector::One)
            .map_err(|err| ToolError::InvalidArguments(format!("selector strategy: {err}"))),
        _ => Err(ToolError::InvalidArguments(
            "selector must be a string, strategy, or chain".into(),
        )),
    }
}

fn parse_state(raw: Option<&str>) -> Result<WaitState, ToolError> {
    match raw {
        None => Ok(WaitState::Visible),
        Some("visible") => Ok(WaitState::Visible),
        Some("hidden") => Ok(WaitState::Hidden),
        Some("attached") => Ok(WaitState::Attached),
        Some("detached") => Ok(WaitState::Detached),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "unknown wait state: {other}"
        ))),
    }
}

fn parse_mode(raw: &str) -> Result<TypeMode, ToolError> {
    match raw {
        "fill" => Ok(TypeMode::Fill),
        "sequential" => Ok(TypeMode::Sequential),
        "paste" => Ok(TypeMode::Paste),
        "native_setter" | "nativeSetter" => Ok(TypeMode::NativeSetter),
        other => Err(ToolError::InvalidArguments(format!(
            "unknown input mode: {other}"
        ))),
    }
}

fn parse_schema(args: &Value) -> Result<ExtractSchema, ToolError> {
    let fields = args
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| ToolError::InvalidArguments("fields object is required".into()))?;
    let mut schema = ExtractSchema::default();
    for (key, spec) in fields {
        let parsed = match spec {
            Value::String(source) => FieldSpec {
                source: source.clone(),
                ty: FieldType::String,
            },
            Value::Object(_) => serde_json::from_value(spec.clone()).map_err(|err| {
                ToolError::InvalidArguments(format!("field {key}: {err}"))
            })?,
            _ => {
                return Err(ToolError::InvalidArguments(format!(
                    "field {key} must be a source string or a spec object"
                )))
            }
        };
        schema.fields.insert(key.clone(), parsed);
    }
    Ok(schema)
}

fn options_from(args: &Value) -> ActionOptions {
    let mut options = ActionOptions::default();
    if let Some(raw) = args.get("timeout") {
        if let Ok(timeout) = serde_json::from_value::<Timeout>(raw.clone()) {
            options.timeout = timeout;
        }
    }
    if let Some(retries) = args.get("retries").and_then(Value::as_u64) {
        options.retries = Some(retries as u32);
    }
    if let Some(flag) = args.get("screenshotOnFailure").and_then(Value::as_bool) {
        options.screenshot_on_failure = Some(flag);
    }
    options
}
