//! Sources of flat `key=value` override properties.

use std::collections::BTreeMap;
use std::env;

/// Supplies the flat property set consulted for option overrides.
pub trait PropertySource: Send + Sync {
    /// Returns every property as `(key, value)` pairs, sorted by key.
    fn properties(&self) -> Vec<(String, String)>;
}

/// Reads override properties from the process environment.
///
/// Variables whose name or value is not valid Unicode are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl PropertySource for ProcessEnvironment {
    fn properties(&self) -> Vec<(String, String)> {
        let mut properties: Vec<(String, String)> = env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        properties.sort();
        properties
    }
}

/// Fixed property set, used when embedding the launcher or in tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaticProperties {
    entries: BTreeMap<String, String>,
}

impl StaticProperties {
    /// Creates an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a property.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for StaticProperties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl PropertySource for StaticProperties {
    fn properties(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_properties_are_sorted_by_key() {
        let properties = StaticProperties::new()
            .with("liftoff.options.b", "2")
            .with("liftoff.options.a", "1");
        let keys: Vec<String> = properties
            .properties()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, ["liftoff.options.a", "liftoff.options.b"]);
    }

    #[test]
    fn later_insertions_replace_earlier_values() {
        let properties: StaticProperties =
            [("liftoff.options.haGroup", "a"), ("liftoff.options.haGroup", "b")]
                .into_iter()
                .collect();
        assert_eq!(
            properties.properties(),
            vec![("liftoff.options.haGroup".to_owned(), "b".to_owned())]
        );
    }
}
