//! Engine envelope behaviour: retry accounting, the navigation guard,
//! postcondition loops, and selector rotation.

use futures::FutureExt;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tether_core::config::RuntimeConfig;
use tether_core::driver::{LoadState, Page};
use tether_core::engine::{execute_action, ActionOptions, Timeout};
use tether_core::error::AutomationError;
use tether_core::mock::{MockDriver, MockHub};
use tether_core::selector::SelectorStrategy;
use tether_core::Runtime;

async fn runtime() -> (Arc<Runtime>, Arc<MockHub>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new();
    let hub = driver.hub();
    let config = RuntimeConfig {
        profiles_dir: dir.path().join("profiles"),
        artifacts_dir: dir.path().join("artifacts"),
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::new(Arc::new(driver), config);
    (runtime, hub, dir)
}

#[tokio::test]
async fn retries_counts_attempts_beyond_first() {
    let (runtime, _hub, _dir) = runtime().await;
    let session = runtime.open_session(None, None).await.unwrap();
    let cx = runtime.action_cx(&session);

    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_body = Arc::clone(&calls);
    let result = execute_action(&cx, "flaky", ActionOptions::default(), move |_inv| {
        let calls = Arc::clone(&calls_in_body);
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AutomationError::AssertionFailed("not yet".into()))
            } else {
                Ok(42u32)
            }
        }
        .boxed()
    })
    .await;

    assert!(result.ok);
    assert_eq!(result.data, Some(42));
    assert_eq!(result.retries, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let entries = runtime.trace().session_trace(session.id());
    assert_eq!(entries.len(), 1);
    assert!(entries[0].ok);
    assert_eq!(entries[0].retries, 2);
}

#[tokio::test]
async fn navigation_guard_terminates_without_retrying() {
    let (runtime, _hub, _dir) = runtime().await;
    let session = runtime.open_session(None, None).await.unwrap();
    let cx = runtime.action_cx(&session);

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_in_body = Arc::clone(&attempts);
    let result: tether_core::engine::ActionResult<()> = execute_action(
        &cx,
        "navigating-body",
        ActionOptions::default().with_retries(4),
        move |inv| {
            let attempts = Arc::clone(&attempts_in_body);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                inv.page()
                    .goto(
                        "https://example.test/elsewhere",
                        LoadState::Load,
                        inv.budget(),
                    )
                    .await
                    .map_err(AutomationError::from)?;
                Err(AutomationError::Other("boom".into()))
            }
            .boxed()
        },
    )
    .await;

    assert!(!result.ok);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(result.retries, 0);
    let structured = result.structured_error.unwrap();
    assert_eq!(structured.code, "NAVIGATION_INTERRUPTED");
}

#[tokio::test]
async fn postcondition_false_is_retried_then_reported() {
    let (runtime, _hub, _dir) = runtime().await;
    let session = runtime.open_session(None, None).await.unwrap();
    let cx = runtime.action_cx(&session);

    let options = ActionOptions::default()
        .with_retries(1)
        .with_timeout(Timeout::Millis(500))
        .with_postcondition(Arc::new(|_inv| {
            async move { Ok::<_, AutomationError>(false) }.boxed()
        }));
    let result = execute_action(&cx, "unverifiable", options, move |_inv| {
        async move { Ok::<_, AutomationError>(json!(1)) }.boxed()
    })
    .await;

    assert!(!result.ok);
    assert_eq!(result.retries, 1);
    let structured = result.structured_error.unwrap();
    assert_eq!(structured.code, "ASSERTION_FAILED");
    assert!(result.error.unwrap().contains("postcondition"));
}

#[tokio::test]
async fn attempt_budget_surfaces_timeout() {
    let (runtime, _hub, _dir) = runtime().await;
    let session = runtime.open_session(None, None).await.unwrap();
    let cx = runtime.action_cx(&session);

    let options = ActionOptions::default()
        .with_retries(0)
        .with_timeout(Timeout::Millis(50));
    let result: tether_core::engine::ActionResult<()> =
        execute_action(&cx, "sleepy", options, move |_inv| {
            async move {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok::<_, AutomationError>(())
            }
            .boxed()
        })
        .await;

    assert!(!result.ok);
    assert_eq!(result.structured_error.unwrap().code, "TIMEOUT_EXCEEDED");
}

#[tokio::test]
async fn target_not_found_rotates_the_strategy_chain() {
    let (runtime, _hub, _dir) = runtime().await;
    let session = runtime.open_session(None, None).await.unwrap();
    let cx = runtime.action_cx(&session);

    let strategies = Arc::new(Mutex::new(vec![
        SelectorStrategy::css("#a"),
        SelectorStrategy::css("#b"),
        SelectorStrategy::css("#c"),
    ]));
    let options = ActionOptions::default()
        .with_retries(2)
        .with_timeout(Timeout::Millis(100))
        .with_strategies(Arc::clone(&strategies));

    let result: tether_core::engine::ActionResult<()> =
        execute_action(&cx, "rotating", options, move |_inv| {
            async move { Err(AutomationError::TargetNotFound("none matched".into())) }.boxed()
        })
        .await;

    assert!(!result.ok);
    // Three attempts, three rotations: the chain is back where it started
    // after cycling through #b-first and #c-first orderings.
    let chain = strategies.lock().unwrap();
    assert_eq!(
        *chain,
        vec![
            SelectorStrategy::css("#a"),
            SelectorStrategy::css("#b"),
            SelectorStrategy::css("#c"),
        ]
    );
}

#[tokio::test]
async fn precondition_failure_is_retryable() {
    let (runtime, _hub, _dir) = runtime().await;
    let session = runtime.open_session(None, None).await.unwrap();
    let cx = runtime.action_cx(&session);

    let gate = Arc::new(AtomicU32::new(0));
    let gate_in_pre = Arc::clone(&gate);
    let options = ActionOptions::default()
        .with_retries(3)
        .with_timeout(Timeout::Millis(500))
        .with_precondition(Arc::new(move |_inv| {
            let gate = Arc::clone(&gate_in_pre);
            async move { Ok::<_, AutomationError>(gate.fetch_add(1, Ordering::SeqCst) >= 2) }
                .boxed()
        }));

    let result = execute_action(&cx, "gated", options, move |_inv| {
        async move { Ok::<_, AutomationError>("ran") }.boxed()
    })
    .await;

    assert!(result.ok);
    assert_eq!(result.retries, 2);
}
