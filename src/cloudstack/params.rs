//! Request parameter bundles.

use std::collections::BTreeMap;
use std::fmt::Display;

/// Parameters of one CloudStack API call.
///
/// Values are kept as strings, which is how the API receives them on the
/// query string. Empty values are never stored by the `*_nonempty` setters so
/// optional fields can be forwarded without branching at every call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiParams {
    values: BTreeMap<String, String>,
}

impl ApiParams {
    /// Creates an empty parameter bundle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Adds a parameter, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Display) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a parameter, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Display) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Sets a parameter only when the value is non-empty.
    pub fn set_nonempty(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.set(key, value);
        }
    }

    /// Sets a parameter only when a value is present.
    pub fn set_opt<T: Display>(&mut self, key: &str, value: Option<T>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }

    /// Sets a comma-joined list parameter when the list is non-empty.
    pub fn set_list<I, S>(&mut self, key: &str, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = items
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.set_nonempty(key, &joined);
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Removes a parameter, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Returns true if the parameter is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterates over parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the parameter names in key order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_setters_skip_empty_values() {
        let mut params = ApiParams::new().with("id", "abc");
        params.set_nonempty("name", "");
        params.set_opt::<u32>("startport", None);
        params.set_list("cidrlist", Vec::<String>::new());

        assert_eq!(params.len(), 1);
        assert_eq!(params.get("id"), Some("abc"));
        assert!(!params.contains("name"));
    }

    #[test]
    fn test_list_is_comma_joined() {
        let mut params = ApiParams::new();
        params.set_list("virtualmachineids", ["vm-1", "vm-2"]);
        assert_eq!(params.get("virtualmachineids"), Some("vm-1,vm-2"));
    }
}
