//! Configuration module for stackform.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stackform.yaml`
//! - Provider connection settings with environment fallback
//! - Validation against the resource descriptors
//! - Computing manifest hashes for change detection

mod hash;
mod manifest;
mod parser;
mod provider;
mod validator;

pub use hash::ConfigHasher;
pub use manifest::{
    DEFAULT_STATE_DIR, Manifest, Reference, ResourceConfig, StateConfig, address,
};
pub use parser::{ConfigParser, DEFAULT_MANIFEST_FILES, find_manifest_file};
pub use provider::{ENV_API_KEY, ENV_ENDPOINT, ENV_SECRET_KEY, ProviderConfig};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
