//! Approval resolution.
//!
//! Order: injected provider → configured `auto_approve` → the
//! `BROWSER_AUTO_APPROVE` environment variable. A provider error falls
//! through to the next step; the final decision is always a boolean.

use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("approval provider: {0}")]
pub struct ApprovalError(pub String);

#[async_trait]
pub trait ApprovalProvider: Send + Sync {
    async fn approve(&self, session_id: &str, message: &str) -> Result<bool, ApprovalError>;
}

pub async fn resolve_approval(
    provider: Option<&Arc<dyn ApprovalProvider>>,
    auto_approve: Option<bool>,
    session_id: &str,
    message: &str,
) -> bool {
    if let Some(provider) = provider {
        match provider.approve(session_id, message).await {
            Ok(decision) => return decision,
            Err(err) => {
                tracing::warn!("approval provider failed, falling back: {err}");
            }
        }
    }
    if let Some(configured) = auto_approve {
        return configured;
    }
    std::env::var("BROWSER_AUTO_APPROVE").map(|v| v == "1") == Ok(true)
}
