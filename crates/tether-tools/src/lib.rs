//! tether-tools: the agent-facing tool surface over the tether runtime.
//!
//! Exposes 26 `browser_*` tools (sessions, actions, page utilities, stable
//! element handles, semantic form work, and approval) plus the approval
//! resolution cascade.

pub mod approval;
pub mod tool;
pub mod toolset;

pub use approval::{resolve_approval, ApprovalError, ApprovalProvider};
pub use tool::{ContentBlock, ToolDefinition, ToolError, ToolOutput};
pub use toolset::BrowserToolset;
