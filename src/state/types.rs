//! State types for tracking applied resources.
//!
//! The state records, per manifest address, the backend identifier and the
//! field map last observed by a lifecycle call. It is the prior state every
//! plan starts from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::resources::ResourceState;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete persisted state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Hash of the last applied manifest.
    #[serde(default)]
    pub manifest_hash: String,
    /// Resources by `type.name` address.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Next creation sequence number.
    #[serde(default)]
    pub next_sequence: u64,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Operation history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// State of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name.
    pub name: String,
    /// Backend identifier.
    pub id: String,
    /// Field map last observed.
    pub fields: Value,
    /// Creation order, used to delete in reverse.
    #[serde(default)]
    pub sequence: u64,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the operation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the operation ran.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: HistoryOperation,
    /// Manifest hash at time of the operation.
    pub manifest_hash: String,
    /// Addresses affected.
    pub resources: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOperation {
    /// Manifest applied.
    Apply,
    /// State refreshed from the backend.
    Refresh,
    /// Everything destroyed.
    Destroy,
}

impl Default for StackState {
    fn default() -> Self {
        Self::new()
    }
}

impl StackState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            manifest_hash: String::new(),
            resources: BTreeMap::new(),
            next_sequence: 0,
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&ResourceRecord> {
        self.resources.get(address)
    }

    /// Records the outcome of a lifecycle call for `address`.
    ///
    /// An absent outcome removes the record; otherwise the record is
    /// inserted or updated, keeping its creation time and sequence.
    pub fn record(&mut self, resource_type: &str, name: &str, outcome: &ResourceState) {
        let address = format!("{resource_type}.{name}");
        let now = Utc::now();
        self.last_updated = now;

        if outcome.is_absent() {
            self.resources.remove(&address);
            return;
        }

        if let Some(existing) = self.resources.get_mut(&address) {
            existing.id.clone_from(&outcome.id);
            existing.fields.clone_from(&outcome.fields);
            existing.updated_at = now;
            return;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.resources.insert(
            address,
            ResourceRecord {
                resource_type: resource_type.to_string(),
                name: name.to_string(),
                id: outcome.id.clone(),
                fields: outcome.fields.clone(),
                sequence,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Removes a resource by address.
    pub fn remove(&mut self, address: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(address);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns addresses in creation order.
    #[must_use]
    pub fn addresses_in_creation_order(&self) -> Vec<&str> {
        let mut records: Vec<_> = self.resources.iter().collect();
        records.sort_by_key(|(_, r)| r.sequence);
        records.into_iter().map(|(a, _)| a.as_str()).collect()
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl ResourceRecord {
    /// Returns the `type.name` address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    /// Returns the record as input to a lifecycle call.
    #[must_use]
    pub fn to_resource_state(&self) -> ResourceState {
        ResourceState {
            id: self.id.clone(),
            fields: self.fields.clone(),
        }
    }
}

impl HistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: HistoryOperation, manifest_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            manifest_hash: manifest_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: HistoryOperation,
        manifest_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            manifest_hash: manifest_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for HistoryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Refresh => "refresh",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
