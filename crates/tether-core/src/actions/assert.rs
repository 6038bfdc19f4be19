//! Assertion factories: predicates usable as pre/postconditions in the
//! engine envelope. Every evaluation appends to the invocation's
//! `assertions_checked` trace metadata.

use crate::driver::WaitState;
use crate::engine::Predicate;
use crate::error::AutomationError;
use crate::resolve::resolve_chain;
use crate::selector::Selector;
use futures::FutureExt;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// Probe budget for element assertions; assertions are checks, not waits.
const ASSERT_BUDGET: Duration = Duration::from_millis(2000);

/// How [`assert_element_text`] compares.
#[derive(Debug, Clone)]
pub enum TextMatch {
    Exact(String),
    Contains(String),
    Matches(Regex),
}

impl TextMatch {
    fn check(&self, text: &str) -> bool {
        match self {
            TextMatch::Exact(expected) => text.trim() == expected,
            TextMatch::Contains(needle) => text.contains(needle.as_str()),
            TextMatch::Matches(pattern) => pattern.is_match(text),
        }
    }
}

pub fn assert_url_contains(fragment: impl Into<String>) -> Predicate {
    let fragment = fragment.into();
    Arc::new(move |inv| {
        let fragment = fragment.clone();
        async move {
            let passed = inv.page().url().contains(&fragment);
            inv.note_assertion(format!("url_contains({fragment})"), passed);
            Ok(passed)
        }
        .boxed()
    })
}

pub fn assert_element_visible(selector: Selector) -> Predicate {
    let name = format!("element_visible({})", selector.key());
    Arc::new(move |inv| {
        let selector = selector.clone();
        let name = name.clone();
        async move {
            let page = inv.page();
            let passed = resolve_chain(
                &page,
                &selector.strategies(),
                WaitState::Visible,
                ASSERT_BUDGET,
            )
            .await
            .is_ok();
            inv.note_assertion(name, passed);
            Ok(passed)
        }
        .boxed()
    })
}

pub fn assert_element_gone(selector: Selector) -> Predicate {
    let name = format!("element_gone({})", selector.key());
    Arc::new(move |inv| {
        let selector = selector.clone();
        let name = name.clone();
        async move {
            let page = inv.page();
            let passed = resolve_chain(
                &page,
                &selector.strategies(),
                WaitState::Hidden,
                ASSERT_BUDGET,
            )
            .await
            .is_ok();
            inv.note_assertion(name, passed);
            Ok(passed)
        }
        .boxed()
    })
}

pub fn assert_element_text(selector: Selector, expected: TextMatch) -> Predicate {
    let name = format!("element_text({})", selector.key());
    Arc::new(move |inv| {
        let selector = selector.clone();
        let expected = expected.clone();
        let name = name.clone();
        async move {
            let page = inv.page();
            let resolution = match resolve_chain(
                &page,
                &selector.strategies(),
                WaitState::Visible,
                ASSERT_BUDGET,
            )
            .await
            {
                Ok(resolution) => resolution,
                Err(_) => {
                    inv.note_assertion(name, false);
                    return Ok(false);
                }
            };
            let text = resolution
                .locator
                .text_content()
                .await
                .map_err(AutomationError::from)?
                .unwrap_or_default();
            let passed = expected.check(&text);
            inv.note_assertion(name, passed);
            Ok(passed)
        }
        .boxed()
    })
}

/// Conjunction; short-circuits on the first failing predicate.
pub fn all_of(predicates: Vec<Predicate>) -> Predicate {
    Arc::new(move |inv| {
        let predicates = predicates.clone();
        async move {
            for predicate in &predicates {
                if !predicate(Arc::clone(&inv)).await? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        .boxed()
    })
}
