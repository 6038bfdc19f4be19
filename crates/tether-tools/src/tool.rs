//! Tool surface types: definitions the agent host advertises and the
//! `{content, details}` result shape every tool returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::AutomationError;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    Execution(String),
}

impl From<AutomationError> for ToolError {
    fn from(err: AutomationError) -> Self {
        ToolError::Execution(err.to_string())
    }
}

/// Definition of one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: schema,
        }
    }

    /// Wire format for tool-listing responses.
    pub fn to_spec(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// What every tool execution returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    pub details: Value,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>, details: Value) -> Self {
        Self {
            content: vec![ContentBlock {
                kind: "text".to_string(),
                text: text.into(),
            }],
            details,
        }
    }
}
