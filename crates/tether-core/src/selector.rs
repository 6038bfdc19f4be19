//! Selector values: a single strategy, a plain CSS string, or an ordered
//! fallback chain tried left-to-right.

use serde::{Deserialize, Serialize};

/// One way of locating an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectorStrategy {
    Aria {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    Label {
        text: String,
    },
    TestId {
        id: String,
    },
    Css {
        selector: String,
    },
    Xpath {
        expression: String,
    },
}

impl SelectorStrategy {
    pub fn css(selector: impl Into<String>) -> Self {
        SelectorStrategy::Css {
            selector: selector.into(),
        }
    }

    pub fn test_id(id: impl Into<String>) -> Self {
        SelectorStrategy::TestId { id: id.into() }
    }

    pub fn aria(role: impl Into<String>, name: Option<&str>) -> Self {
        SelectorStrategy::Aria {
            role: role.into(),
            name: name.map(|n| n.to_string()),
        }
    }

    pub fn label(text: impl Into<String>) -> Self {
        SelectorStrategy::Label { text: text.into() }
    }

    pub fn text(text: impl Into<String>, exact: bool) -> Self {
        SelectorStrategy::Text {
            text: text.into(),
            exact,
        }
    }

    /// Short display form used in logs and dedup keys.
    pub fn describe(&self) -> String {
        match self {
            SelectorStrategy::Aria { role, name } => match name {
                Some(n) => format!("aria:{role}[{n}]"),
                None => format!("aria:{role}"),
            },
            SelectorStrategy::Text { text, exact } => {
                if *exact {
                    format!("text={text}")
                } else {
                    format!("text~{text}")
                }
            }
            SelectorStrategy::Label { text } => format!("label:{text}"),
            SelectorStrategy::TestId { id } => format!("testid:{id}"),
            SelectorStrategy::Css { selector } => format!("css:{selector}"),
            SelectorStrategy::Xpath { expression } => format!("xpath:{expression}"),
        }
    }
}

/// Input accepted by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    /// Bare CSS string, wrapped into a `Css` strategy at resolution time.
    Css(String),
    One(SelectorStrategy),
    Chain(Vec<SelectorStrategy>),
}

impl Selector {
    /// The strategies in source order. Plain CSS and single strategies yield
    /// one-element chains; an empty chain stays empty and is rejected by the
    /// resolver.
    pub fn strategies(&self) -> Vec<SelectorStrategy> {
        match self {
            Selector::Css(css) => vec![SelectorStrategy::css(css.clone())],
            Selector::One(strategy) => vec![strategy.clone()],
            Selector::Chain(chain) => chain.clone(),
        }
    }

    /// Stable key for dedup maps and trace entries.
    pub fn key(&self) -> String {
        self.strategies()
            .iter()
            .map(SelectorStrategy::describe)
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl From<&str> for Selector {
    fn from(css: &str) -> Self {
        Selector::Css(css.to_string())
    }
}

impl From<SelectorStrategy> for Selector {
    fn from(strategy: SelectorStrategy) -> Self {
        Selector::One(strategy)
    }
}

impl From<Vec<SelectorStrategy>> for Selector {
    fn from(chain: Vec<SelectorStrategy>) -> Self {
        Selector::Chain(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_string_becomes_single_strategy() {
        let sel = Selector::from("#btn");
        let chain = sel.strategies();
        assert_eq!(chain, vec![SelectorStrategy::css("#btn")]);
    }

    #[test]
    fn keys_are_order_sensitive() {
        let a = Selector::Chain(vec![
            SelectorStrategy::css("#btn"),
            SelectorStrategy::test_id("action-btn"),
        ]);
        let b = Selector::Chain(vec![
            SelectorStrategy::test_id("action-btn"),
            SelectorStrategy::css("#btn"),
        ]);
        assert_ne!(a.key(), b.key());
    }
}
