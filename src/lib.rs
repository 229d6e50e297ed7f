// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackform
//!
//! A declarative, idempotent reconciliation engine for CloudStack
//! infrastructure.
//!
//! ## Overview
//!
//! Stackform lets you:
//!
//! - Declare networks, public addresses, firewall and port forwarding rules,
//!   security groups, virtual machines, volumes and load balancer rules in
//!   a YAML manifest
//! - Compare the manifest with what the last run observed
//! - Apply the differences through the CloudStack API, one resource at a time
//!
//! ## Architecture
//!
//! Every resource type is an adapter plugged into one generic lifecycle:
//!
//! 1. **Resolver**: turns human-readable names (zones, offerings, templates)
//!    into backend identifiers
//! 2. **Fetch**: reads one object by identifier, falling back to an unscoped
//!    query when a scoped lookup comes back empty
//! 3. **Set reconciliation**: turns differences in set-valued fields into
//!    the minimal add and remove calls
//! 4. **Lifecycle**: create, read, update and delete, each ending with a
//!    read so recorded fields always reflect the backend
//!
//! ## Modules
//!
//! - [`cloudstack`]: API transport, signing client and remote records
//! - [`reconcile`]: Resolver, fetch, set reconciliation and lifecycle
//! - [`resources`]: The eight resource adapters and their registry
//! - [`config`]: Manifest parsing and validation
//! - [`state`]: Persisted per-resource state and locking
//! - [`planner`]: Diff computation, plans and execution
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! resources:
//!   - type: network
//!     name: web
//!     fields:
//!       name: web
//!       display_text: Web tier
//!       network_offering_name: DefaultIsolatedNetworkOfferingWithSourceNatService
//!       zone_name: zone-1
//!
//!   - type: ip_address
//!     name: front
//!     fields:
//!       network_id: ${network.web.id}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cloudstack;
pub mod config;
pub mod error;
pub mod planner;
pub mod reconcile;
pub mod resources;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloudstack::{ApiParams, CloudStackClient, Transport};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, Manifest};
pub use error::{Result, StackformError};
pub use planner::{DiffEngine, Plan, PlanExecutor};
pub use reconcile::{ApiContext, Lifecycle, Resource, ResourceData};
pub use resources::{DynResource, ResourceRegistry, ResourceState};
pub use state::{LocalStateStore, StackState, StateStore};
