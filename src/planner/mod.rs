//! Planning module for apply operations.
//!
//! This module compares the manifest with persisted state, turns the
//! differences into an ordered plan, and executes that plan through the
//! resource lifecycles.

mod diff;
mod executor;
mod plan;
mod references;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ActionResult, ExecutionResult, PlanExecutor, RefreshResult};
pub use plan::{ActionType, Plan, PlannedAction};
pub use references::{lookup, resolve_fields, resolve_value};
