//! Manifest types: the structs that map to `stackform.yaml`.
//!
//! A manifest declares the provider connection, where state lives, and an
//! ordered list of resources. Each resource's `fields` is a free mapping;
//! its shape is checked against the resource type's descriptor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::provider::ProviderConfig;

/// Default state directory, relative to the manifest.
pub const DEFAULT_STATE_DIR: &str = ".stackform";

/// The root manifest structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Provider connection settings.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// State location.
    #[serde(default)]
    pub state: StateConfig,
    /// Declared resources, in dependency order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// The `state` section of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// State directory.
    #[serde(default = "default_state_dir")]
    pub path: String,
}

fn default_state_dir() -> String {
    String::from(DEFAULT_STATE_DIR)
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_dir(),
        }
    }
}

/// One declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    /// Resource type tag, e.g. `network`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Name, unique per type.
    pub name: String,
    /// Declared field values.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ResourceConfig {
    /// Returns the `type.name` address.
    #[must_use]
    pub fn address(&self) -> String {
        address(&self.resource_type, &self.name)
    }

    /// Returns every reference in the declared fields.
    #[must_use]
    pub fn references(&self) -> Vec<Reference> {
        let mut found = Vec::new();
        for value in self.fields.values() {
            collect_references(value, &mut found);
        }
        found
    }
}

impl Manifest {
    /// Finds a declared resource by address.
    #[must_use]
    pub fn resource(&self, address: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.address() == address)
    }
}

/// Builds a `type.name` address.
#[must_use]
pub fn address(resource_type: &str, name: &str) -> String {
    format!("{resource_type}.{name}")
}

/// A `${type.name.field}` reference to a field of another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Referenced resource type.
    pub resource_type: String,
    /// Referenced resource name.
    pub name: String,
    /// Referenced field; `id` is the backend identifier.
    pub field: String,
}

impl Reference {
    /// Parses a string of the exact form `${type.name.field}`.
    ///
    /// Anything else, including strings that merely contain a reference,
    /// is a literal.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.strip_prefix("${")?.strip_suffix('}')?;
        let mut parts = inner.split('.');
        let (Some(resource_type), Some(name), Some(field), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if [resource_type, name, field].iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            field: field.to_string(),
        })
    }

    /// Returns the address of the referenced resource.
    #[must_use]
    pub fn address(&self) -> String {
        address(&self.resource_type, &self.name)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}.{}}}", self.resource_type, self.name, self.field)
    }
}

fn collect_references(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::String(text) => found.extend(Reference::parse(text)),
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reference() {
        let reference = Reference::parse("${network.web.id}").unwrap();
        assert_eq!(reference.resource_type, "network");
        assert_eq!(reference.name, "web");
        assert_eq!(reference.field, "id");
        assert_eq!(reference.address(), "network.web");
        assert_eq!(reference.to_string(), "${network.web.id}");
    }

    #[test]
    fn test_non_references_are_literals() {
        assert!(Reference::parse("network.web.id").is_none());
        assert!(Reference::parse("${network.web}").is_none());
        assert!(Reference::parse("${network.web.id.extra}").is_none());
        assert!(Reference::parse("${network..id}").is_none());
        assert!(Reference::parse("prefix-${network.web.id}").is_none());
    }

    #[test]
    fn test_references_found_inside_lists() {
        let resource = ResourceConfig {
            resource_type: String::from("load_balancer_rule"),
            name: String::from("web"),
            fields: json!({
                "public_ip_id": "${ip_address.front.id}",
                "virtual_machine_ids": ["${virtual_machine.a.id}", "vm-literal"]
            })
            .as_object()
            .cloned()
            .unwrap(),
        };

        let addresses: Vec<_> = resource.references().iter().map(Reference::address).collect();
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains(&String::from("ip_address.front")));
        assert!(addresses.contains(&String::from("virtual_machine.a")));
    }
}
