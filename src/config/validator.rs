//! Manifest validation.
//!
//! Checks a parsed manifest against the registered resource descriptors
//! before any backend call is made: addresses, field names, required
//! fields, references, and field types.

use crate::error::{ConfigError, Result, StackformError};
use crate::resources::ResourceRegistry;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use super::manifest::{Manifest, Reference, ResourceConfig};

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    registry: ResourceRegistry,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a validator over the built-in resource types.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(ResourceRegistry::builtin())
    }

    /// Creates a validator over a custom registry.
    #[must_use]
    pub const fn with_registry(registry: ResourceRegistry) -> Self {
        Self { registry }
    }

    /// Collects every problem in the manifest.
    #[must_use]
    pub fn check(&self, manifest: &Manifest) -> ValidationResult {
        let mut result = ValidationResult::default();

        if manifest.state.path.trim().is_empty() {
            result.push("state.path", "State path cannot be empty");
        }

        if manifest.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources declared in manifest"));
        }

        // Address -> position, for duplicate and ordering checks.
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (i, resource) in manifest.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_name(&resource.name) {
                result.push(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must start with a letter and contain only letters, digits, '_' or '-'.",
                        resource.name
                    ),
                );
            }

            let address = resource.address();
            if positions.contains_key(&address) {
                result.push(
                    format!("{prefix}.name"),
                    ConfigError::DuplicateAddress { address }.to_string(),
                );
            } else {
                positions.insert(address, i);
            }

            self.validate_fields(resource, &prefix, &mut result);
        }

        for (i, resource) in manifest.resources.iter().enumerate() {
            self.validate_references(manifest, resource, i, &positions, &mut result);
        }

        result
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let result = self.check(manifest);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StackformError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_fields(&self, resource: &ResourceConfig, prefix: &str, result: &mut ValidationResult) {
        let Some(descriptor) = self.registry.descriptor(&resource.resource_type) else {
            result.push(
                format!("{prefix}.type"),
                ConfigError::UnknownResourceType {
                    resource_type: resource.resource_type.clone(),
                }
                .to_string(),
            );
            return;
        };

        for (key, value) in &resource.fields {
            match descriptor.field(key) {
                None => result.push(
                    format!("{prefix}.fields.{key}"),
                    format!("Unknown field for {}", descriptor.type_tag),
                ),
                Some(spec) if spec.computed => result.push(
                    format!("{prefix}.fields.{key}"),
                    String::from("Field is computed and cannot be set"),
                ),
                Some(_) if value.is_null() => result.push(
                    format!("{prefix}.fields.{key}"),
                    String::from("Field value cannot be null"),
                ),
                Some(_) => {}
            }
        }

        for spec in descriptor.required_fields() {
            if !resource.fields.contains_key(spec.name) {
                result.push(
                    format!("{prefix}.fields.{}", spec.name),
                    format!("Required field missing for {}", descriptor.type_tag),
                );
            }
        }

        // Referenced values are only known at apply time; type-check the rest.
        let literal: Map<String, Value> = resource
            .fields
            .iter()
            .filter(|(key, value)| descriptor.field(key).is_some() && !has_reference(value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if let Ok(lifecycle) = self.registry.get(&resource.resource_type) {
            if let Err(e) = lifecycle.validate(&Value::Object(literal)) {
                result.push(format!("{prefix}.fields"), e.to_string());
            }
        }
    }

    fn validate_references(
        &self,
        manifest: &Manifest,
        resource: &ResourceConfig,
        index: usize,
        positions: &HashMap<String, usize>,
        result: &mut ValidationResult,
    ) {
        let prefix = format!("resources[{index}].fields");

        for reference in resource.references() {
            let target = reference.address();
            let unresolved = |reason: &str| {
                ConfigError::UnresolvedReference {
                    reference: reference.to_string(),
                    reason: reason.to_string(),
                }
                .to_string()
            };

            match positions.get(&target) {
                None => result.push(prefix.clone(), unresolved("no such resource in manifest")),
                Some(&position) if position == index => {
                    result.push(prefix.clone(), unresolved("a resource cannot reference itself"));
                }
                Some(&position) if position > index => {
                    result.push(prefix.clone(), unresolved("referenced resource is declared later"));
                }
                Some(_) => {
                    let known_field = reference.field == "id"
                        || manifest
                            .resource(&target)
                            .and_then(|r| self.registry.descriptor(&r.resource_type))
                            .is_some_and(|d| d.field(&reference.field).is_some());
                    if !known_field {
                        result.push(prefix.clone(), unresolved("unknown field"));
                    }
                }
            }
        }
    }
}

fn has_reference(value: &Value) -> bool {
    match value {
        Value::String(text) => Reference::parse(text).is_some(),
        Value::Array(items) => items.iter().any(has_reference),
        Value::Object(map) => map.values().any(has_reference),
        _ => false,
    }
}

/// Validates that a resource name can be used in an address.
/// Names start with a letter and contain letters, digits, `_` or `-`.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    // First character must be a letter
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ValidationResult {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn check(yaml: &str) -> ValidationResult {
        let manifest = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        ConfigValidator::new().check(&manifest)
    }

    fn messages(result: &ValidationResult) -> Vec<String> {
        result.errors.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("web_tier-1"));
        assert!(is_valid_name("A"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1web")); // starts with number
        assert!(!is_valid_name("web.tier")); // dot separates addresses
        assert!(!is_valid_name("web tier"));
    }

    #[test]
    fn test_valid_manifest_passes() {
        let result = check(
            r"
resources:
  - type: ip_address
    name: front
    fields:
      zone_name: zone-a
  - type: firewall_rule
    name: https
    fields:
      ip_address_id: ${ip_address.front.id}
      protocol: tcp
      start_port: 443
",
        );
        assert!(result.is_valid(), "{:?}", messages(&result));
    }

    #[test]
    fn test_duplicate_address() {
        let result = check(
            r"
resources:
  - type: network
    name: web
    fields: {name: a, display_text: a}
  - type: network
    name: web
    fields: {name: b, display_text: b}
",
        );
        assert_eq!(result.error_count(), 1);
        assert!(messages(&result)[0].contains("network.web"));
    }

    #[test]
    fn test_unknown_type_and_field() {
        let result = check(
            r"
resources:
  - type: bucket
    name: b
  - type: network
    name: web
    fields: {name: a, display_text: a, colour: blue}
",
        );
        let all = messages(&result).join("\n");
        assert!(all.contains("Unknown resource type: bucket"));
        assert!(all.contains("resources[1].fields.colour"));
    }

    #[test]
    fn test_missing_required_and_computed_fields() {
        let result = check(
            r"
resources:
  - type: network
    name: web
    fields: {name: a, cidr: 10.0.0.0/24}
",
        );
        let all = messages(&result).join("\n");
        assert!(all.contains("fields.display_text: Required field missing"));
        assert!(all.contains("fields.cidr: Field is computed"));
    }

    #[test]
    fn test_mistyped_field() {
        let result = check(
            r"
resources:
  - type: port_forwarding_rule
    name: ssh
    fields:
      ip_address_id: ip-1
      protocol: tcp
      private_port: ssh
      public_port: 22
      virtual_machine_id: vm-1
",
        );
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "resources[0].fields");
    }

    #[test]
    fn test_reference_checks() {
        let result = check(
            r"
resources:
  - type: firewall_rule
    name: early
    fields:
      ip_address_id: ${ip_address.front.id}
      protocol: tcp
  - type: ip_address
    name: front
    fields: {zone_name: zone-a}
  - type: firewall_rule
    name: missing
    fields:
      ip_address_id: ${ip_address.back.id}
      protocol: tcp
  - type: firewall_rule
    name: badfield
    fields:
      ip_address_id: ${ip_address.front.colour}
      protocol: tcp
",
        );
        let all = messages(&result).join("\n");
        assert_eq!(result.error_count(), 3, "{all}");
        assert!(all.contains("declared later"));
        assert!(all.contains("no such resource"));
        assert!(all.contains("unknown field"));
    }

    #[test]
    fn test_validate_returns_first_error() {
        let manifest = ConfigParser::new()
            .parse_yaml("resources:\n  - type: bucket\n    name: b\n", None)
            .unwrap();
        let err = ConfigValidator::new().validate(&manifest).unwrap_err();
        assert!(matches!(
            err,
            StackformError::Config(ConfigError::ValidationError { field: Some(ref f), .. }) if f == "resources[0].type"
        ));
    }

    #[test]
    fn test_empty_manifest_warns() {
        let result = check("resources: []\n");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_init_template_is_valid() {
        let result = check(include_str!("../../templates/stackform.yaml"));
        assert!(result.is_valid(), "{:?}", messages(&result));
    }
}
