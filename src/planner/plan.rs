//! Execution plan types and construction.
//!
//! A plan lists the lifecycle calls needed to move persisted state to the
//! manifest. Deletes of dropped resources come first, newest first; the
//! remaining actions follow manifest order, which is also dependency order.

use chrono::{DateTime, Utc};

use crate::state::StackState;

use super::diff::{DiffDetail, DiffResult, DiffType};

/// A complete execution plan.
#[derive(Debug)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the manifest this plan is based on.
    pub manifest_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Resource type tag.
    pub resource_type: String,
    /// Resource name.
    pub name: String,
    /// Reason for this action.
    pub reason: String,
    /// Field changes behind an update or replace.
    pub changes: Vec<DiffDetail>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create a new instance.
    Create,
    /// Update the instance in place.
    Update,
    /// Delete then recreate.
    Replace,
    /// Delete the instance.
    Delete,
}

impl Plan {
    /// Creates a plan from a diff result.
    #[must_use]
    pub fn from_diff(diff: &DiffResult, manifest_hash: &str) -> Self {
        let actions = diff
            .diffs
            .iter()
            .filter_map(|d| {
                let (action_type, reason) = match d.diff_type {
                    DiffType::Create => (ActionType::Create, String::from("declared in manifest")),
                    DiffType::Update => (ActionType::Update, changed_fields(&d.details)),
                    DiffType::Replace => (
                        ActionType::Replace,
                        format!("forced by {}", forcing_fields(&d.details)),
                    ),
                    DiffType::Delete => (ActionType::Delete, String::from("removed from manifest")),
                    DiffType::NoChange => return None,
                };
                Some(PlannedAction {
                    action_type,
                    resource_type: d.resource_type.clone(),
                    name: d.name.clone(),
                    reason,
                    changes: d.details.clone(),
                })
            })
            .collect();

        Self {
            created_at: Utc::now(),
            manifest_hash: manifest_hash.to_string(),
            actions,
        }
    }

    /// Creates a plan deleting everything in `state`, newest first.
    #[must_use]
    pub fn destroy(state: &StackState) -> Self {
        let actions = state
            .addresses_in_creation_order()
            .into_iter()
            .rev()
            .filter_map(|address| state.get(address))
            .map(|record| PlannedAction {
                action_type: ActionType::Delete,
                resource_type: record.resource_type.clone(),
                name: record.name.clone(),
                reason: String::from("destroy requested"),
                changes: vec![],
            })
            .collect();

        Self {
            created_at: Utc::now(),
            manifest_hash: state.manifest_hash.clone(),
            actions,
        }
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(manifest_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            manifest_hash: manifest_hash.to_string(),
            actions: vec![],
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of one type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Returns the addresses touched by the plan.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.actions.iter().map(PlannedAction::address).collect()
    }
}

impl PlannedAction {
    /// Returns the `type.name` address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.address()),
            ActionType::Update => format!("Update {} in place", self.address()),
            ActionType::Replace => format!("Replace {}", self.address()),
            ActionType::Delete => format!("Delete {}", self.address()),
        }
    }
}

fn changed_fields(details: &[DiffDetail]) -> String {
    let fields: Vec<_> = details.iter().map(|d| d.field.as_str()).collect();
    format!("changed {}", fields.join(", "))
}

fn forcing_fields(details: &[DiffDetail]) -> String {
    let fields: Vec<_> = details
        .iter()
        .filter(|d| d.force_new)
        .map(|d| d.field.as_str())
        .collect();
    fields.join(", ")
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.address())?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}
