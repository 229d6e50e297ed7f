//! Diff engine for comparing the manifest with persisted state.
//!
//! Declared fields are compared key by key with the field map recorded by
//! the last lifecycle call. Keys the manifest does not declare keep their
//! recorded value and never produce a difference.

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{Manifest, ResourceConfig};
use crate::error::{ConfigError, Result};
use crate::reconcile::{FieldKind, ResourceDescriptor};
use crate::resources::ResourceRegistry;
use crate::state::{ResourceRecord, StackState};

use super::references::resolve_value;

/// Engine for computing diffs between the manifest and state.
#[derive(Debug)]
pub struct DiffEngine<'a> {
    registry: &'a ResourceRegistry,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// `type.name` address.
    pub address: String,
    /// Resource type tag.
    pub resource_type: String,
    /// Resource name.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Changed fields.
    pub details: Vec<DiffDetail>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Declared but not in state.
    Create,
    /// A force-new field changed.
    Replace,
    /// Only mutable fields changed.
    Update,
    /// In state but no longer declared.
    Delete,
    /// Nothing changed.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Recorded value.
    pub old_value: Option<Value>,
    /// Declared value; `None` when it depends on a resource not yet applied.
    pub new_value: Option<Value>,
    /// Whether the change forces replacement.
    pub force_new: bool,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// All resource diffs, deletes first.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine over a registry.
    #[must_use]
    pub const fn new(registry: &'a ResourceRegistry) -> Self {
        Self { registry }
    }

    /// Computes the diff between the manifest and state.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest names an unknown resource type.
    pub fn compute_diff(&self, manifest: &Manifest, state: &StackState) -> Result<DiffResult> {
        let mut diffs = Vec::new();

        // Resources dropped from the manifest, newest first.
        let mut orphans: Vec<&ResourceRecord> = state
            .resources
            .iter()
            .filter(|(address, _)| manifest.resource(address).is_none())
            .map(|(_, record)| record)
            .collect();
        orphans.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        for record in orphans {
            debug!("Found orphaned resource: {}", record.address());
            diffs.push(ResourceDiff {
                address: record.address(),
                resource_type: record.resource_type.clone(),
                name: record.name.clone(),
                diff_type: DiffType::Delete,
                details: vec![],
            });
        }

        for resource in &manifest.resources {
            let descriptor = self.registry.descriptor(&resource.resource_type).ok_or_else(|| {
                ConfigError::UnknownResourceType {
                    resource_type: resource.resource_type.clone(),
                }
            })?;
            diffs.push(Self::compute_resource_diff(
                descriptor,
                resource,
                state.get(&resource.address()),
                state,
            ));
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        Ok(DiffResult {
            creates: count(DiffType::Create),
            replaces: count(DiffType::Replace),
            updates: count(DiffType::Update),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        })
    }

    fn compute_resource_diff(
        descriptor: &ResourceDescriptor,
        resource: &ResourceConfig,
        record: Option<&ResourceRecord>,
        state: &StackState,
    ) -> ResourceDiff {
        let mut diff = ResourceDiff {
            address: resource.address(),
            resource_type: resource.resource_type.clone(),
            name: resource.name.clone(),
            diff_type: DiffType::NoChange,
            details: vec![],
        };

        let Some(record) = record else {
            debug!("{} needs to be created", diff.address);
            diff.diff_type = DiffType::Create;
            return diff;
        };

        let empty = Map::new();
        let recorded = record.fields.as_object().unwrap_or(&empty);

        for (field, declared) in &resource.fields {
            let old_value = recorded.get(field);
            let new_value = resolve_value(declared, state).ok();
            let kind = descriptor.field(field).map_or(FieldKind::Scalar, |f| f.kind);

            let same = new_value
                .as_ref()
                .is_some_and(|new| matches(kind, old_value.unwrap_or(&Value::Null), new));
            if !same {
                diff.details.push(DiffDetail {
                    field: field.clone(),
                    old_value: old_value.cloned(),
                    new_value,
                    force_new: descriptor.is_force_new(field),
                });
            }
        }

        diff.diff_type = if diff.details.iter().any(|d| d.force_new) {
            DiffType::Replace
        } else if diff.details.is_empty() {
            DiffType::NoChange
        } else {
            DiffType::Update
        };
        debug!("{}: {:?}", diff.address, diff.diff_type);
        diff
    }
}

/// Returns true if the recorded value satisfies the declared one.
fn matches(kind: FieldKind, recorded: &Value, declared: &Value) -> bool {
    match (kind, recorded, declared) {
        (FieldKind::Set, Value::Array(old), Value::Array(new)) => {
            old.len() == new.len()
                && new.iter().all(|d| old.iter().any(|r| covers(r, d)))
                && old.iter().all(|r| new.iter().any(|d| covers(r, d)))
        }
        _ => covers(recorded, declared),
    }
}

/// Structural match where a declared object only constrains its own keys.
///
/// Recorded elements carry backend-assigned keys (such as rule ids) and
/// defaults the manifest never spells out.
fn covers(recorded: &Value, declared: &Value) -> bool {
    match (recorded, declared) {
        (Value::Object(old), Value::Object(new)) => new
            .iter()
            .all(|(key, value)| covers(old.get(key).unwrap_or(&Value::Null), value)),
        (Value::Array(old), Value::Array(new)) => {
            old.len() == new.len() && old.iter().zip(new).all(|(r, d)| covers(r, d))
        }
        _ => recorded == declared,
    }
}
