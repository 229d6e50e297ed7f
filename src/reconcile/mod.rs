//! Reconciliation core.
//!
//! This module holds the logic shared by every resource type:
//! - Resolving names to backend identifiers
//! - Reading objects by identifier with an unscoped fallback
//! - Diffing sub-object sets into add/remove calls
//! - Driving the create/read/update/delete lifecycle

mod context;
mod data;
mod descriptor;
mod fetch;
mod lifecycle;
mod resolver;
mod setdiff;

pub use context::ApiContext;
pub use data::ResourceData;
pub use descriptor::{FieldKind, FieldSpec, ResourceDescriptor};
pub use fetch::fetch_by_id;
pub use lifecycle::{Lifecycle, Resource};
pub use resolver::{
    ReferenceKind, match_exact, resolve, resolve_changed_reference, resolve_reference,
};
pub use setdiff::{BatchedCalls, ItemizedCalls, SetDiff, apply_batched, apply_itemized, diff};
