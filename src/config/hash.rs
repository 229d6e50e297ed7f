//! Manifest hashing for change detection.
//!
//! This module provides deterministic hashing of the manifest and of each
//! resource's declared fields. Hashes are recorded in state history and
//! shown in plans.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::manifest::{Manifest, ResourceConfig};

/// Hasher for computing manifest hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new manifest hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the declared resources.
    ///
    /// Provider settings are left out, so rotating credentials does not
    /// change the hash. Resource order matters, since it is execution order.
    #[must_use]
    pub fn hash_manifest(&self, manifest: &Manifest) -> String {
        let mut hasher = Sha256::new();

        hasher.update(manifest.state.path.as_bytes());
        for resource in &manifest.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for one declared resource.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.resource_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.hash_fields(&Value::Object(resource.fields.clone())).as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of a field map.
    ///
    /// Object keys are serialized in sorted order, so two maps with the same
    /// entries hash the same regardless of declaration order.
    #[must_use]
    pub fn hash_fields(&self, fields: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(fields.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_resource(name: &str, fields: Value) -> ResourceConfig {
        ResourceConfig {
            resource_type: String::from("network"),
            name: name.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_resource_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let resource = create_test_resource("web", json!({"name": "web"}));

        assert_eq!(hasher.hash_resource(&resource), hasher.hash_resource(&resource));
    }

    #[test]
    fn test_different_resources_different_hash() {
        let hasher = ConfigHasher::new();
        let a = create_test_resource("web", json!({"name": "web"}));
        let b = create_test_resource("db", json!({"name": "web"}));

        assert_ne!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let hasher = ConfigHasher::new();
        let a: Value = serde_json::from_str(r#"{"name": "web", "vlan": "100"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"vlan": "100", "name": "web"}"#).unwrap();

        assert_eq!(hasher.hash_fields(&a), hasher.hash_fields(&b));
    }

    #[test]
    fn test_provider_settings_do_not_change_manifest_hash() {
        let hasher = ConfigHasher::new();
        let mut manifest = Manifest {
            resources: vec![create_test_resource("web", json!({"name": "web"}))],
            ..Manifest::default()
        };
        let before = hasher.hash_manifest(&manifest);
        manifest.provider.api_key = Some(String::from("rotated"));

        assert_eq!(before, hasher.hash_manifest(&manifest));
    }
}
