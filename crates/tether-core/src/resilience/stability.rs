//! DOM-stability wait: an in-page mutation observer with a quiet-period
//! timer and a hard deadline. Resolves on whichever fires first and never
//! errors in the action path.

use crate::driver::Page;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_QUIET: Duration = Duration::from_millis(200);
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(5000);

/// Script template; `%QUIET%`/`%DEADLINE%` are substituted in milliseconds.
const STABILITY_SCRIPT: &str = r#"
new Promise((resolve) => {
  const quiet = %QUIET%;
  const deadline = %DEADLINE%;
  let quietTimer = null;
  const done = (stable) => {
    observer.disconnect();
    clearTimeout(hardTimer);
    if (quietTimer) clearTimeout(quietTimer);
    resolve(stable);
  };
  const hardTimer = setTimeout(() => done(false), deadline);
  const observer = new MutationObserver(() => {
    if (quietTimer) clearTimeout(quietTimer);
    quietTimer = setTimeout(() => done(true), quiet);
  });
  observer.observe(document.documentElement || document, {
    childList: true,
    subtree: true,
    attributes: true,
    characterData: true,
  });
  quietTimer = setTimeout(() => done(true), quiet);
})
"#;

/// Wait until the DOM has been quiet for `quiet`, or `deadline` elapses.
///
/// Returns the milliseconds spent waiting. Driver failures (detached frame,
/// navigation racing the observer) are swallowed; stability is an
/// opportunistic wait, not a correctness gate.
pub async fn wait_for_dom_stability(
    page: &Arc<dyn Page>,
    quiet: Duration,
    deadline: Duration,
) -> u64 {
    let script = STABILITY_SCRIPT
        .replace("%QUIET%", &quiet.as_millis().to_string())
        .replace("%DEADLINE%", &deadline.as_millis().to_string());

    let started = Instant::now();
    // The deadline lives inside the page; the outer race only guards against
    // a driver that never settles the evaluate call.
    let outer = deadline + Duration::from_millis(500);
    match tokio::time::timeout(outer, page.evaluate(&script)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            tracing::debug!("dom stability wait skipped: {err}");
        }
        Err(_) => {
            tracing::debug!("dom stability wait outlived its deadline");
        }
    }
    started.elapsed().as_millis() as u64
}

/// Defaults-applied form used by the interaction primitives.
pub async fn settle(page: &Arc<dyn Page>) -> u64 {
    wait_for_dom_stability(page, DEFAULT_QUIET, DEFAULT_DEADLINE).await
}
