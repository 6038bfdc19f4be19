use serde::Serialize;

/// The closed set of failures the engine reasons about.
///
/// Anything outside this taxonomy is carried as [`AutomationError::Other`]
/// and surfaces to callers as a plain message string, never as a
/// [`StructuredError`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum AutomationError {
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Stale element: {0}")]
    StaleElement(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Navigation interrupted: {0}")]
    NavigationInterrupted(String),

    #[error("Timeout exceeded: {0}")]
    TimeoutExceeded(String),

    #[error("Session unhealthy: {0}")]
    SessionUnhealthy(String),

    #[error("{0}")]
    Other(String),
}

impl AutomationError {
    /// Stable error code for the typed kinds; `None` for untyped errors.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AutomationError::TargetNotFound(_) => Some("TARGET_NOT_FOUND"),
            AutomationError::StaleElement(_) => Some("STALE_ELEMENT"),
            AutomationError::AssertionFailed(_) => Some("ASSERTION_FAILED"),
            AutomationError::NavigationInterrupted(_) => Some("NAVIGATION_INTERRUPTED"),
            AutomationError::TimeoutExceeded(_) => Some("TIMEOUT_EXCEEDED"),
            AutomationError::SessionUnhealthy(_) => Some("SESSION_UNHEALTHY"),
            AutomationError::Other(_) => None,
        }
    }

    /// Default recovery hint shipped alongside the code.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            AutomationError::TargetNotFound(_) => {
                "Verify the selector or add fallback strategies"
            }
            AutomationError::StaleElement(_) => "Re-register the element handle",
            AutomationError::AssertionFailed(_) => "Inspect the page state and retry",
            AutomationError::NavigationInterrupted(_) => {
                "Re-issue the action against the new page"
            }
            AutomationError::TimeoutExceeded(_) => "Increase the timeout or verify the condition",
            AutomationError::SessionUnhealthy(_) => "Wait for pool recovery or reopen the session",
            AutomationError::Other(_) => "Check action parameters",
        }
    }

    /// Whether the engine may retry after this error.
    ///
    /// `NavigationInterrupted` is terminal: the page the action started on is
    /// gone, so restarting the body would act on a different document.
    /// `SessionUnhealthy` is terminal at action level; the pool owns recovery.
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            AutomationError::NavigationInterrupted(_) | AutomationError::SessionUnhealthy(_)
        )
    }

    /// Structured record for results, only for typed kinds.
    pub fn structured(&self) -> Option<StructuredError> {
        self.code().map(|code| StructuredError {
            code,
            message: self.to_string(),
            recovery_hint: self.recovery_hint(),
        })
    }
}

/// Machine-readable error record exposed in [`ActionResult`]s.
///
/// [`ActionResult`]: crate::engine::ActionResult
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StructuredError {
    pub code: &'static str,
    pub message: String,
    pub recovery_hint: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_kinds_carry_codes() {
        let err = AutomationError::TargetNotFound("#missing".into());
        let s = err.structured().unwrap();
        assert_eq!(s.code, "TARGET_NOT_FOUND");
        assert!(s.message.contains("#missing"));
    }

    #[test]
    fn unknown_errors_stay_unstructured() {
        let err = AutomationError::Other("driver hiccup".into());
        assert!(err.code().is_none());
        assert!(err.structured().is_none());
        assert!(err.retryable());
    }

    #[test]
    fn navigation_interrupt_is_terminal() {
        assert!(!AutomationError::NavigationInterrupted("url changed".into()).retryable());
        assert!(!AutomationError::SessionUnhealthy("context gone".into()).retryable());
        assert!(AutomationError::TimeoutExceeded("5s".into()).retryable());
    }
}
