//! CloudStack API access.
//!
//! This module provides the transport boundary used by the reconciliation
//! core, the request parameter bundle, the typed API records, and the signed
//! HTTP client.

mod client;
mod params;
mod transport;
mod types;

pub use client::{
    CloudStackClient, DEFAULT_ASYNC_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_SECS,
    sign, signed_query,
};
pub use params::ApiParams;
#[cfg(test)]
pub use transport::MockTransport;
pub use transport::Transport;
pub use types::{
    ApiObject, FirewallRule, Identified, LoadBalancerRule, Named, NamedRecord, Network, Nic,
    PortForwardingRule, PublicIpAddress, SecurityGroup, SecurityGroupRule, VirtualMachine,
    Volume, created_id, decode_list,
};
