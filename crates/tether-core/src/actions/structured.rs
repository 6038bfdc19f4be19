//! Structured extraction: a schema mapping output keys to source
//! attributes, applied across every element a chain resolves to. Each row
//! is validated against the schema before acceptance, and every accepted
//! row carries a provenance record naming where it came from.

use crate::driver::WaitState;
use crate::engine::{execute_action, ActionCx, ActionOptions, ActionResult};
use crate::error::AutomationError;
use crate::resilience::stability;
use crate::resolve::resolve_chain;
use crate::selector::Selector;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const DEFAULT_ROW_LIMIT: usize = 50;

/// Target type a source value is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
}

/// Where one output key comes from: `textContent`, `innerHTML`, or an HTML
/// attribute name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub source: String,
    #[serde(default)]
    pub ty: FieldType,
}

/// Output-key → source mapping. Ordered so extraction is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl ExtractSchema {
    /// Shorthand: every key sources an attribute of the same name as a
    /// string.
    pub fn of_attributes(pairs: &[(&str, &str)]) -> Self {
        let fields = pairs
            .iter()
            .map(|(key, source)| {
                (
                    key.to_string(),
                    FieldSpec {
                        source: source.to_string(),
                        ty: FieldType::String,
                    },
                )
            })
            .collect();
        Self { fields }
    }
}

/// Where an accepted row came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub index: usize,
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredRows {
    pub data: Vec<Map<String, Value>>,
    pub provenance: Vec<Provenance>,
}

pub async fn extract_structured(
    cx: &ActionCx,
    selector: Selector,
    schema: ExtractSchema,
    limit: Option<usize>,
    options: ActionOptions,
) -> ActionResult<StructuredRows> {
    let strategies = Arc::new(Mutex::new(selector.strategies()));
    let options = options
        .with_selector(selector.key())
        .with_strategies(Arc::clone(&strategies));
    execute_action(cx, "extract_structured", options, move |inv| {
        let strategies = Arc::clone(&strategies);
        let schema = schema.clone();
        async move {
            let page = inv.page();
            inv.note_wait("dom_stability", stability::settle(&page).await);
            let chain = strategies.lock().unwrap().clone();
            let resolution =
                resolve_chain(&page, &chain, WaitState::Attached, inv.budget()).await?;
            inv.note_resolution(resolution.meta());
            let strategy = resolution.strategy.describe();

            let count = resolution.locator.count().await.map_err(AutomationError::from)?;
            let take = count.min(limit.unwrap_or(DEFAULT_ROW_LIMIT));

            let mut data = Vec::new();
            let mut provenance = Vec::new();
            for index in 0..take {
                let element = resolution.locator.nth(index);

                let mut row = Map::new();
                let mut valid = true;
                for (key, spec) in &schema.fields {
                    let raw = match spec.source.as_str() {
                        "textContent" => {
                            element.text_content().await.map_err(AutomationError::from)?
                        }
                        "innerHTML" => Some(
                            element.inner_html().await.map_err(AutomationError::from)?,
                        ),
                        attr => element
                            .get_attribute(attr)
                            .await
                            .map_err(AutomationError::from)?,
                    };
                    match raw.and_then(|raw| coerce(&raw, spec.ty)) {
                        Some(value) => {
                            row.insert(key.clone(), value);
                        }
                        None => {
                            valid = false;
                            break;
                        }
                    }
                }
                if !valid {
                    tracing::debug!(index, "row rejected by schema");
                    continue;
                }

                let tag_name = element
                    .evaluate("el.tagName.toLowerCase()")
                    .await
                    .map_err(AutomationError::from)?
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let id = element.get_attribute("id").await.map_err(AutomationError::from)?;
                let class_name = element
                    .get_attribute("class")
                    .await
                    .map_err(AutomationError::from)?;

                data.push(row);
                provenance.push(Provenance {
                    index,
                    tag_name,
                    id,
                    class_name,
                    strategy: strategy.clone(),
                });
            }

            Ok(StructuredRows { data, provenance })
        }
        .boxed()
    })
    .await
}

fn coerce(raw: &str, ty: FieldType) -> Option<Value> {
    match ty {
        FieldType::String => Some(Value::String(raw.trim().to_string())),
        FieldType::Number => {
            let parsed: f64 = raw.trim().parse().ok()?;
            serde_json::Number::from_f64(parsed).map(Value::Number)
        }
        FieldType::Integer => {
            let parsed: i64 = raw.trim().parse().ok()?;
            Some(Value::Number(parsed.into()))
        }
        FieldType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "checked" => Some(Value::Bool(true)),
            "false" | "0" | "no" | "off" | "" => Some(Value::Bool(false)),
            _ => None,
        },
    }
}
