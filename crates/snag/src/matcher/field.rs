//! Key/value predicates for query parameters and headers.

use crate::error::panic_message;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

pub type MapPredicate = Arc<dyn Fn(&HashMap<String, String>) -> bool + Send + Sync>;

/// How a string map (query or headers) is compared.
#[derive(Clone)]
pub enum FieldPredicate {
    /// Every expected key is present with an equal value; extra keys ignored.
    Shallow(HashMap<String, String>),
    /// Same key set and equal values.
    Strict(HashMap<String, String>),
    Custom(MapPredicate),
}

impl FieldPredicate {
    pub fn shallow<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        FieldPredicate::Shallow(collect(pairs))
    }

    pub fn strict<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        FieldPredicate::Strict(collect(pairs))
    }

    /// User predicate over the whole map. A panic counts as no match.
    ///
    /// Runs while the owning rule registry is locked, so it must not add or
    /// remove rules on the same session.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> bool + Send + Sync + 'static,
    {
        FieldPredicate::Custom(Arc::new(f))
    }

    /// Lower-case expected keys, for header comparison.
    pub(crate) fn lowercase_keys(self) -> Self {
        let lower = |map: HashMap<String, String>| {
            map.into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect()
        };
        match self {
            FieldPredicate::Shallow(map) => FieldPredicate::Shallow(lower(map)),
            FieldPredicate::Strict(map) => FieldPredicate::Strict(lower(map)),
            custom => custom,
        }
    }

    pub fn matches(&self, actual: &HashMap<String, String>) -> bool {
        match self {
            FieldPredicate::Shallow(expected) => contains_all(expected, actual),
            FieldPredicate::Strict(expected) => {
                expected.len() == actual.len() && contains_all(expected, actual)
            }
            FieldPredicate::Custom(f) => match catch_unwind(AssertUnwindSafe(|| f(actual))) {
                Ok(matched) => matched,
                Err(payload) => {
                    warn!("custom field predicate panicked, treating as no match: {}", panic_message(payload));
                    false
                }
            },
        }
    }
}

fn collect<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> HashMap<String, String>
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn contains_all(expected: &HashMap<String, String>, actual: &HashMap<String, String>) -> bool {
    expected
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}

impl fmt::Debug for FieldPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPredicate::Shallow(map) => f.debug_tuple("Shallow").field(map).finish(),
            FieldPredicate::Strict(map) => f.debug_tuple("Strict").field(map).finish(),
            FieldPredicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actual() -> HashMap<String, String> {
        collect([("a", "1"), ("b", "2")])
    }

    #[test]
    fn test_shallow_ignores_extra_keys() {
        assert!(FieldPredicate::shallow([("a", "1")]).matches(&actual()));
        assert!(!FieldPredicate::shallow([("a", "2")]).matches(&actual()));
        assert!(!FieldPredicate::shallow([("c", "1")]).matches(&actual()));
    }

    #[test]
    fn test_strict_requires_same_key_set() {
        assert!(!FieldPredicate::strict([("a", "1")]).matches(&actual()));
        assert!(FieldPredicate::strict([("a", "1"), ("b", "2")]).matches(&actual()));
        assert!(!FieldPredicate::strict([("a", "1"), ("b", "3")]).matches(&actual()));
    }

    #[test]
    fn test_custom() {
        let p = FieldPredicate::custom(|m| m.len() == 2);
        assert!(p.matches(&actual()));
        assert_eq!(format!("{p:?}"), "Custom(..)");
    }

    #[test]
    fn test_panicking_custom_is_no_match() {
        let p = FieldPredicate::custom(|_| panic!("predicate bug"));
        assert!(!p.matches(&actual()));
    }

    #[test]
    fn test_lowercase_keys() {
        let p = FieldPredicate::shallow([("X-Trace", "on")]).lowercase_keys();
        assert!(p.matches(&collect([("x-trace", "on")])));
    }
}
