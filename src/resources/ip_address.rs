//! Public IP address resource, including its static NAT binding.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cloudstack::{ApiParams, PublicIpAddress, created_id};
use crate::error::{ReconcileError, Result};
use crate::reconcile::{
    ApiContext, FieldSpec, ReferenceKind, Resource, ResourceData, ResourceDescriptor, resolve,
};

/// Descriptor of the `ip_address` type.
pub const DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
    type_tag: "ip_address",
    fields: &[
        FieldSpec::identifier("zone_id").force_new(),
        FieldSpec::name_alias("zone_name").force_new(),
        FieldSpec::identifier("network_id").force_new(),
        FieldSpec::scalar("ip_address").computed(),
        FieldSpec::scalar("is_source_nat").computed(),
        FieldSpec::scalar("is_static_nat"),
        FieldSpec::identifier("virtual_machine_id"),
    ],
};

/// Fields of a public IP address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpAddressFields {
    /// Zone identifier.
    pub zone_id: String,
    /// Zone name.
    pub zone_name: String,
    /// Network to associate the address with.
    pub network_id: String,
    /// The allocated address.
    pub ip_address: String,
    /// Whether this is the network's source NAT address.
    pub is_source_nat: bool,
    /// Whether static NAT should be enabled.
    pub is_static_nat: bool,
    /// Machine to bind through static NAT.
    pub virtual_machine_id: String,
}

impl IpAddressFields {
    fn nat_target(&self) -> Option<&str> {
        (self.is_static_nat && !self.virtual_machine_id.is_empty())
            .then_some(self.virtual_machine_id.as_str())
    }
}

/// Adapter for public IP addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpAddressResource;

/// Moves the static NAT binding from `prior` to `desired`.
///
/// The current binding is disabled when NAT is switched off or the target
/// machine changes; the new one is enabled when NAT is on and the target is
/// new.
async fn reconcile_static_nat(
    ctx: &ApiContext,
    id: &str,
    prior: &IpAddressFields,
    desired: &IpAddressFields,
) -> Result<()> {
    let current = prior.nat_target();
    let wanted = desired.nat_target();

    if current.is_some() && current != wanted {
        info!(id, "Disabling static NAT");
        ctx.call("disableStaticNat", ApiParams::new().with("ipaddressid", id))
            .await?;
    }

    if let Some(machine) = wanted {
        if current != wanted {
            info!(id, machine, "Enabling static NAT");
            let params = ApiParams::new()
                .with("ipaddressid", id)
                .with("virtualmachineid", machine);
            ctx.call("enableStaticNat", params).await?;
        }
    }

    Ok(())
}

#[async_trait]
impl Resource for IpAddressResource {
    type Fields = IpAddressFields;
    type Remote = PublicIpAddress;
    const DESCRIPTOR: &'static ResourceDescriptor = &DESCRIPTOR;

    async fn create_remote(&self, ctx: &ApiContext, data: &ResourceData<IpAddressFields>) -> Result<String> {
        let f = data.get();
        let mut params = ApiParams::new();

        if !f.network_id.is_empty() {
            params.set("networkid", &f.network_id);
        }
        if !f.zone_id.is_empty() {
            params.set("zoneid", &f.zone_id);
        } else if !f.zone_name.is_empty() {
            params.set("zoneid", resolve(ctx, ReferenceKind::Zone, &f.zone_name).await?);
        }
        if params.is_empty() {
            return Err(ReconcileError::missing("network_id or zone").into());
        }

        let response = ctx.call("associateIpAddress", params).await?;
        created_id("associateIpAddress", &response, "ipaddress")
    }

    async fn after_create(&self, ctx: &ApiContext, data: &ResourceData<IpAddressFields>) -> Result<()> {
        reconcile_static_nat(ctx, data.id(), &IpAddressFields::default(), data.get()).await
    }

    fn apply_remote(remote: &PublicIpAddress, fields: &mut IpAddressFields) {
        fields.ip_address.clone_from(&remote.ip_address);
        fields.zone_id.clone_from(&remote.zone_id);
        fields.zone_name.clone_from(&remote.zone_name);
        fields.network_id.clone_from(&remote.associated_network_id);
        fields.is_source_nat = remote.is_source_nat;
        fields.is_static_nat = remote.is_static_nat;
        fields.virtual_machine_id.clone_from(&remote.virtual_machine_id);
    }

    async fn update_remote(&self, ctx: &ApiContext, data: &ResourceData<IpAddressFields>) -> Result<()> {
        if data.has_change(|f| &f.is_static_nat) || data.has_change(|f| &f.virtual_machine_id) {
            reconcile_static_nat(ctx, data.id(), data.prior(), data.get()).await?;
        }
        Ok(())
    }

    async fn delete_remote(&self, ctx: &ApiContext, data: &ResourceData<IpAddressFields>) -> Result<()> {
        if data.get().is_source_nat {
            info!(id = data.id(), "Source NAT address is released with its network, skipping");
            return Ok(());
        }
        ctx.call("disassociateIpAddress", ApiParams::new().with("id", data.id()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Lifecycle;
    use crate::testing::{FakeTransport, context};
    use serde_json::json;

    fn listed(static_nat: bool, machine: &str) -> serde_json::Value {
        json!({"publicipaddress": [{
            "id": "ip-1",
            "ipaddress": "203.0.113.10",
            "associatednetworkid": "net-1",
            "issourcenat": false,
            "isstaticnat": static_nat,
            "virtualmachineid": machine
        }]})
    }

    fn nat(enabled: bool, machine: &str) -> IpAddressFields {
        IpAddressFields {
            network_id: String::from("net-1"),
            is_static_nat: enabled,
            virtual_machine_id: machine.to_string(),
            ..IpAddressFields::default()
        }
    }

    #[tokio::test]
    async fn test_create_enables_static_nat() {
        let transport = FakeTransport::new();
        transport
            .reply("associateIpAddress", json!({"ipaddress": {"id": "ip-1"}}))
            .reply("listPublicIpAddresses", listed(true, "vm-1"));

        let mut data = ResourceData::new(nat(true, "vm-1"));
        Lifecycle::new(IpAddressResource)
            .create(&context(&transport), &mut data)
            .await
            .unwrap();

        assert_eq!(
            transport.commands(),
            vec!["associateIpAddress", "enableStaticNat", "listPublicIpAddresses"]
        );
        assert_eq!(data.get().ip_address, "203.0.113.10");
    }

    #[tokio::test]
    async fn test_changed_machine_rebinds() {
        let transport = FakeTransport::new();
        transport.reply("listPublicIpAddresses", listed(true, "vm-2"));

        let mut data = ResourceData::changed("ip-1", nat(true, "vm-1"), nat(true, "vm-2"));
        Lifecycle::new(IpAddressResource)
            .update(&context(&transport), &mut data)
            .await
            .unwrap();

        assert_eq!(
            transport.commands(),
            vec!["disableStaticNat", "enableStaticNat", "listPublicIpAddresses"]
        );
        let enable = &transport.calls_to("enableStaticNat")[0];
        assert_eq!(enable.get("virtualmachineid"), Some("vm-2"));
    }

    #[tokio::test]
    async fn test_turning_nat_off_only_disables() {
        let transport = FakeTransport::new();
        transport.reply("listPublicIpAddresses", listed(false, ""));

        let mut data = ResourceData::changed("ip-1", nat(true, "vm-1"), nat(false, "vm-1"));
        Lifecycle::new(IpAddressResource)
            .update(&context(&transport), &mut data)
            .await
            .unwrap();

        assert_eq!(
            transport.commands(),
            vec!["disableStaticNat", "listPublicIpAddresses"]
        );
    }

    #[tokio::test]
    async fn test_source_nat_address_is_not_released() {
        let transport = FakeTransport::new();
        transport.reply(
            "listPublicIpAddresses",
            json!({"publicipaddress": [{"id": "ip-1", "issourcenat": true}]}),
        );

        let mut data = ResourceData::existing("ip-1", IpAddressFields::default());
        Lifecycle::new(IpAddressResource)
            .delete(&context(&transport), &mut data)
            .await
            .unwrap();

        assert!(transport.calls_to("disassociateIpAddress").is_empty());
        assert!(data.is_absent());
    }
}
