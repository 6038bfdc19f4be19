pub mod dismiss;
pub mod stability;

pub use dismiss::{DismissGuard, DismissRules, PopupDismisser, DEFAULT_DISMISS_PATTERNS};
pub use stability::{settle, wait_for_dom_stability};
