use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct QueryKey(pub Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    Exact(QueryKey),
    /// Every key whose leading segments equal the prefix.
    Prefix(QueryKey),
    AnyOf(Vec<QueryKey>),
}

impl KeySelector {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeySelector::Exact(exact) => exact == key,
            KeySelector::Prefix(prefix) => key.starts_with(prefix),
            KeySelector::AnyOf(keys) => keys.contains(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_selector() {
        let selector = KeySelector::Prefix(QueryKey::new(["tasks"]));

        assert!(selector.matches(&QueryKey::new(["tasks", "p1"])));
        assert!(selector.matches(&QueryKey::new(["tasks"])));
        assert!(!selector.matches(&QueryKey::new(["notes", "p1"])));
    }

    #[test]
    fn test_exact_selector() {
        let selector = KeySelector::Exact(QueryKey::new(["tasks", "p1"]));

        assert!(selector.matches(&QueryKey::new(["tasks", "p1"])));
        assert!(!selector.matches(&QueryKey::new(["tasks", "p1", "archived"])));
    }

    #[test]
    fn test_any_of_selector() {
        let selector = KeySelector::AnyOf(vec![
            QueryKey::new(["tasks", "p1"]),
            QueryKey::new(["tasks", "sprint-3"]),
        ]);

        assert!(selector.matches(&QueryKey::new(["tasks", "sprint-3"])));
        assert!(!selector.matches(&QueryKey::new(["tasks", "p2"])));
    }
}
