//! Resource adapters for the supported CloudStack object types.
//!
//! Each submodule supplies a typed field set and a [`Resource`] adapter.
//! The [`ResourceRegistry`] exposes them to the host behind a JSON
//! boundary, where field maps are decoded into the typed sets once.

mod firewall_rule;
mod ip_address;
mod load_balancer_rule;
mod network;
mod port_forwarding_rule;
mod security_group;
mod virtual_machine;
mod volume;

pub use firewall_rule::{FirewallRuleFields, FirewallRuleResource};
pub use ip_address::{IpAddressFields, IpAddressResource};
pub use load_balancer_rule::{LoadBalancerRuleFields, LoadBalancerRuleResource};
pub use network::{NetworkFields, NetworkResource};
pub use port_forwarding_rule::{PortForwardingRuleFields, PortForwardingRuleResource};
pub use security_group::{SecurityGroupFields, SecurityGroupResource, SecurityRule};
pub use virtual_machine::{NicFields, VirtualMachineFields, VirtualMachineResource};
pub use volume::{VolumeFields, VolumeResource};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{ConfigError, ReconcileError, Result, StackformError};
use crate::reconcile::{ApiContext, Lifecycle, Resource, ResourceData, ResourceDescriptor};

/// Returns true for the ICMP protocol, in any case.
pub(crate) fn is_icmp(protocol: &str) -> bool {
    protocol.eq_ignore_ascii_case("icmp")
}

/// Splits a comma-separated CIDR list as reported by the backend.
pub(crate) fn split_cidrs(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|cidr| !cidr.is_empty())
        .map(String::from)
        .collect()
}

/// Persisted state of one resource instance: identifier and field map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceState {
    /// Backend identifier, empty when absent.
    pub id: String,
    /// Field map as a JSON object.
    pub fields: Value,
}

impl ResourceState {
    /// State for an instance about to be created.
    #[must_use]
    pub fn planned(fields: Value) -> Self {
        Self {
            id: String::new(),
            fields,
        }
    }

    /// Returns true if the instance is absent.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.id.is_empty()
    }
}

/// Type-erased lifecycle of one resource type.
///
/// Every operation writes the observed state back into `state`, also when
/// it returns an error.
#[async_trait]
pub trait DynResource: Send + Sync {
    /// Returns the type's descriptor.
    fn descriptor(&self) -> &'static ResourceDescriptor;

    /// Checks that a field map decodes into the typed field set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFields` with the decoder message.
    fn validate(&self, fields: &Value) -> Result<()>;

    /// Creates the instance from `state.fields`.
    async fn create(&self, ctx: &ApiContext, state: &mut ResourceState) -> Result<()>;

    /// Refreshes `state` from the backend.
    async fn read(&self, ctx: &ApiContext, state: &mut ResourceState) -> Result<()>;

    /// Moves the instance from `state.fields` to `desired`.
    async fn update(&self, ctx: &ApiContext, state: &mut ResourceState, desired: &Value) -> Result<()>;

    /// Deletes the instance.
    async fn delete(&self, ctx: &ApiContext, state: &mut ResourceState) -> Result<()>;
}

fn decode<F: DeserializeOwned>(resource_type: &str, fields: &Value) -> Result<F> {
    let fields = if fields.is_null() {
        Value::Object(Map::new())
    } else {
        fields.clone()
    };
    serde_json::from_value(fields).map_err(|e| {
        ReconcileError::InvalidFields {
            resource_type: resource_type.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn encode<F: Serialize>(resource_type: &str, fields: &F) -> Result<Value> {
    serde_json::to_value(fields).map_err(|e| {
        ReconcileError::InvalidFields {
            resource_type: resource_type.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Writes typed data back into `state`, keeping the operation's error first.
fn write_back<F: Serialize>(
    resource_type: &str,
    data: ResourceData<F>,
    state: &mut ResourceState,
    outcome: Result<()>,
) -> Result<()> {
    let (id, fields) = data.into_parts();
    state.id = id;
    let encoded = encode(resource_type, &fields);
    match encoded {
        Ok(value) => {
            state.fields = value;
            outcome
        }
        Err(e) => outcome.and(Err(e)),
    }
}

#[async_trait]
impl<R: Resource + 'static> DynResource for Lifecycle<R> {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        R::DESCRIPTOR
    }

    fn validate(&self, fields: &Value) -> Result<()> {
        decode::<R::Fields>(R::DESCRIPTOR.type_tag, fields).map(|_| ())
    }

    async fn create(&self, ctx: &ApiContext, state: &mut ResourceState) -> Result<()> {
        let tag = R::DESCRIPTOR.type_tag;
        if !state.is_absent() {
            return Err(StackformError::internal(format!(
                "cannot create {tag} {}: already exists",
                state.id
            )));
        }
        let fields = decode::<R::Fields>(tag, &state.fields)?;
        let mut data = ResourceData::new(fields);
        let outcome = Lifecycle::<R>::create(self, ctx, &mut data).await;
        write_back(tag, data, state, outcome)
    }

    async fn read(&self, ctx: &ApiContext, state: &mut ResourceState) -> Result<()> {
        let tag = R::DESCRIPTOR.type_tag;
        let fields = decode::<R::Fields>(tag, &state.fields)?;
        let mut data = ResourceData::existing(state.id.clone(), fields);
        let outcome = Lifecycle::<R>::read(self, ctx, &mut data).await;
        write_back(tag, data, state, outcome)
    }

    async fn update(&self, ctx: &ApiContext, state: &mut ResourceState, desired: &Value) -> Result<()> {
        let tag = R::DESCRIPTOR.type_tag;
        let prior = decode::<R::Fields>(tag, &state.fields)?;
        let desired = decode::<R::Fields>(tag, desired)?;
        let mut data = ResourceData::changed(state.id.clone(), prior, desired);
        let outcome = Lifecycle::<R>::update(self, ctx, &mut data).await;
        write_back(tag, data, state, outcome)
    }

    async fn delete(&self, ctx: &ApiContext, state: &mut ResourceState) -> Result<()> {
        let tag = R::DESCRIPTOR.type_tag;
        let fields = decode::<R::Fields>(tag, &state.fields)?;
        let mut data = ResourceData::existing(state.id.clone(), fields);
        let outcome = Lifecycle::<R>::delete(self, ctx, &mut data).await;
        write_back(tag, data, state, outcome)
    }
}

/// Lookup table from type tag to lifecycle.
#[derive(Clone)]
pub struct ResourceRegistry {
    resources: BTreeMap<&'static str, Arc<dyn DynResource>>,
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("types", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            resources: BTreeMap::new(),
        }
    }

    /// Creates a registry with every built-in resource type.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(NetworkResource);
        registry.register(IpAddressResource);
        registry.register(FirewallRuleResource);
        registry.register(PortForwardingRuleResource);
        registry.register(SecurityGroupResource);
        registry.register(VirtualMachineResource);
        registry.register(VolumeResource);
        registry.register(LoadBalancerRuleResource);
        registry
    }

    /// Registers a resource adapter under its type tag.
    pub fn register<R: Resource + 'static>(&mut self, resource: R) {
        self.resources
            .insert(R::DESCRIPTOR.type_tag, Arc::new(Lifecycle::new(resource)));
    }

    /// Returns the lifecycle for a type tag.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResourceType` for an unregistered tag.
    pub fn get(&self, resource_type: &str) -> Result<Arc<dyn DynResource>> {
        self.resources.get(resource_type).cloned().ok_or_else(|| {
            ConfigError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            }
            .into()
        })
    }

    /// Returns the descriptor for a type tag, if registered.
    #[must_use]
    pub fn descriptor(&self, resource_type: &str) -> Option<&'static ResourceDescriptor> {
        self.resources.get(resource_type).map(|r| r.descriptor())
    }

    /// Returns the registered type tags in order.
    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resources.keys().copied()
    }
}
