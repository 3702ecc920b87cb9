// src/recipe/overridable.rs

//! Values that recipes can override per distro or architecture

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value keyed by override selector, with `""` as the default
///
/// Recipes write `deps_ubuntu=(...)` or `deps_arm64=(...)` next to a plain
/// `deps=(...)`; each becomes one entry here. [`resolve`](Self::resolve)
/// picks the first selector, in platform priority order, that has a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverridableField<T> {
    values: BTreeMap<String, T>,
    #[serde(default)]
    resolved: Option<String>,
}

impl<T> Default for OverridableField<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            resolved: None,
        }
    }
}

impl<T: Clone + Default> OverridableField<T> {
    /// A field holding only a default value
    pub fn new(default: T) -> Self {
        let mut field = Self::default();
        field.set("", default);
        field
    }

    pub fn set(&mut self, selector: &str, value: T) {
        self.values.insert(selector.to_string(), value);
    }

    pub fn get(&self, selector: &str) -> Option<&T> {
        self.values.get(selector)
    }

    pub fn has(&self, selector: &str) -> bool {
        self.values.contains_key(selector)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pick the value for the first selector present in `selectors`
    ///
    /// Returns the chosen selector, if any matched.
    pub fn resolve(&mut self, selectors: &[String]) -> Option<&str> {
        self.resolved = selectors.iter().find(|s| self.values.contains_key(*s)).cloned();
        self.resolved.as_deref()
    }

    /// The selector chosen by the last [`resolve`](Self::resolve)
    pub fn resolved_selector(&self) -> Option<&str> {
        self.resolved.as_deref()
    }

    /// The resolved value; the type's default when nothing matched
    pub fn resolved(&self) -> T {
        self.resolved
            .as_ref()
            .and_then(|s| self.values.get(s))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_most_specific_selector_wins() {
        let mut field = OverridableField::new(vec!["default".to_string()]);
        field.set("debian", vec!["deb".to_string()]);
        field.set("amd64_ubuntu", vec!["ubuntu-amd64".to_string()]);

        let order = selectors(&["amd64_ubuntu_24_04", "ubuntu_24_04", "amd64_ubuntu", "ubuntu", "debian", ""]);
        assert_eq!(field.resolve(&order), Some("amd64_ubuntu"));
        assert_eq!(field.resolved(), vec!["ubuntu-amd64"]);

        let order = selectors(&["fedora", ""]);
        field.resolve(&order);
        assert_eq!(field.resolved(), vec!["default"]);
    }

    #[test]
    fn test_unresolved_is_default_value() {
        let mut field: OverridableField<String> = OverridableField::default();
        assert_eq!(field.resolve(&selectors(&["x", ""])), None);
        assert_eq!(field.resolved(), "");
    }
}
