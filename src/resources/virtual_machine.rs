//! Virtual machine resource.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::cloudstack::{self, ApiParams, created_id};
use crate::error::Result;
use crate::reconcile::{
    ApiContext, FieldSpec, ReferenceKind, Resource, ResourceData, ResourceDescriptor, resolve,
    resolve_reference,
};

/// Descriptor of the `virtual_machine` type.
pub const DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
    type_tag: "virtual_machine",
    fields: &[
        FieldSpec::identifier("zone_id").force_new(),
        FieldSpec::name_alias("zone_name").force_new(),
        FieldSpec::identifier("service_offering_id").force_new(),
        FieldSpec::name_alias("service_offering_name").force_new(),
        FieldSpec::identifier("template_id").force_new(),
        FieldSpec::name_alias("template_name").force_new(),
        FieldSpec::scalar("name").force_new(),
        FieldSpec::scalar("display_name"),
        FieldSpec::scalar("key_pair").force_new(),
        FieldSpec::scalar("user_data").force_new(),
        FieldSpec::set("security_group_names").force_new(),
        FieldSpec::set("network_ids").force_new(),
        FieldSpec::set("network_names").force_new(),
        FieldSpec::scalar("expunge"),
        FieldSpec::list("nic").computed(),
    ],
};

/// A network interface as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NicFields {
    /// NIC identifier.
    pub id: String,
    /// Gateway.
    pub gateway: String,
    /// Address on the network.
    pub ip_address: String,
    /// Whether this is the default NIC.
    pub is_default: bool,
    /// MAC address.
    pub mac_address: String,
    /// Netmask.
    pub netmask: String,
    /// Network identifier.
    pub network_id: String,
    /// Network name.
    pub network_name: String,
    /// Traffic type.
    pub traffic_type: String,
    /// NIC type.
    #[serde(rename = "type")]
    pub nic_type: String,
}

impl From<&cloudstack::Nic> for NicFields {
    fn from(nic: &cloudstack::Nic) -> Self {
        Self {
            id: nic.id.clone(),
            gateway: nic.gateway.clone(),
            ip_address: nic.ip_address.clone(),
            is_default: nic.is_default,
            mac_address: nic.mac_address.clone(),
            netmask: nic.netmask.clone(),
            network_id: nic.network_id.clone(),
            network_name: nic.network_name.clone(),
            traffic_type: nic.traffic_type.clone(),
            nic_type: nic.nic_type.clone(),
        }
    }
}

/// Fields of a virtual machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VirtualMachineFields {
    /// Zone identifier.
    pub zone_id: String,
    /// Zone name.
    pub zone_name: String,
    /// Service offering identifier.
    pub service_offering_id: String,
    /// Service offering name.
    pub service_offering_name: String,
    /// Template identifier.
    pub template_id: String,
    /// Template name.
    pub template_name: String,
    /// Host name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// SSH key pair name.
    pub key_pair: String,
    /// Plain-text user data, encoded on the wire.
    pub user_data: String,
    /// Security groups to join, by name.
    pub security_group_names: BTreeSet<String>,
    /// Networks to attach, by identifier.
    pub network_ids: BTreeSet<String>,
    /// Networks to attach, by name; used when no identifiers are given.
    pub network_names: BTreeSet<String>,
    /// Purge the machine immediately on deletion.
    pub expunge: bool,
    /// Network interfaces, reported by the backend.
    pub nic: Vec<NicFields>,
}

/// Adapter for virtual machines.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualMachineResource;

async fn network_ids(ctx: &ApiContext, fields: &VirtualMachineFields) -> Result<Vec<String>> {
    if !fields.network_ids.is_empty() {
        return Ok(fields.network_ids.iter().cloned().collect());
    }

    let mut ids = Vec::with_capacity(fields.network_names.len());
    for name in &fields.network_names {
        ids.push(resolve(ctx, ReferenceKind::Network, name).await?);
    }
    Ok(ids)
}

#[async_trait]
impl Resource for VirtualMachineResource {
    type Fields = VirtualMachineFields;
    type Remote = cloudstack::VirtualMachine;
    const DESCRIPTOR: &'static ResourceDescriptor = &DESCRIPTOR;

    async fn create_remote(&self, ctx: &ApiContext, data: &ResourceData<VirtualMachineFields>) -> Result<String> {
        let f = data.get();
        let zone_id = resolve_reference(ctx, ReferenceKind::Zone, "zone", &f.zone_id, &f.zone_name).await?;
        let offering_id = resolve_reference(
            ctx,
            ReferenceKind::ServiceOffering,
            "service_offering",
            &f.service_offering_id,
            &f.service_offering_name,
        )
        .await?;
        let template_id = resolve_reference(
            ctx,
            ReferenceKind::Template,
            "template",
            &f.template_id,
            &f.template_name,
        )
        .await?;
        let networks = network_ids(ctx, f).await?;

        let mut params = ApiParams::new()
            .with("zoneid", zone_id)
            .with("serviceofferingid", offering_id)
            .with("templateid", template_id);
        params.set_nonempty("name", &f.name);
        params.set_nonempty("displayname", &f.display_name);
        params.set_nonempty("keypair", &f.key_pair);
        params.set_list("securitygroupnames", &f.security_group_names);
        params.set_list("networkids", &networks);
        if !f.user_data.is_empty() {
            params.set("userdata", STANDARD.encode(f.user_data.as_bytes()));
        }

        let response = ctx.call("deployVirtualMachine", params).await?;
        created_id("deployVirtualMachine", &response, "virtualmachine")
    }

    fn apply_remote(remote: &cloudstack::VirtualMachine, fields: &mut VirtualMachineFields) {
        fields.zone_id.clone_from(&remote.zone_id);
        fields.zone_name.clone_from(&remote.zone_name);
        fields.service_offering_id.clone_from(&remote.service_offering_id);
        fields.service_offering_name.clone_from(&remote.service_offering_name);
        fields.template_id.clone_from(&remote.template_id);
        fields.template_name.clone_from(&remote.template_name);
        fields.name.clone_from(&remote.name);
        fields.display_name.clone_from(&remote.display_name);
        fields.key_pair.clone_from(&remote.key_pair);
        fields.nic = remote.nic.iter().map(NicFields::from).collect();
        fields.network_ids = remote.nic.iter().map(|n| n.network_id.clone()).collect();
        fields.network_names = remote
            .nic
            .iter()
            .map(|n| n.network_name.clone())
            .filter(|name| !name.is_empty())
            .collect();
        fields.security_group_names = remote
            .security_groups
            .iter()
            .map(|g| g.name.clone())
            .collect();
    }

    async fn update_remote(&self, ctx: &ApiContext, data: &ResourceData<VirtualMachineFields>) -> Result<()> {
        if data.has_change(|f| &f.display_name) {
            let params = ApiParams::new()
                .with("id", data.id())
                .with("displayname", &data.get().display_name);
            ctx.call("updateVirtualMachine", params).await?;
        }
        Ok(())
    }

    async fn delete_remote(&self, ctx: &ApiContext, data: &ResourceData<VirtualMachineFields>) -> Result<()> {
        let mut params = ApiParams::new().with("id", data.id());
        if data.get().expunge {
            params.set("expunge", true);
        }
        ctx.call("destroyVirtualMachine", params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Lifecycle;
    use crate::testing::{FakeTransport, context};
    use serde_json::json;

    fn listed_vm() -> serde_json::Value {
        json!({"virtualmachine": [{
            "id": "vm-1",
            "name": "web-1",
            "displayname": "Web 1",
            "state": "Running",
            "zoneid": "z-1",
            "zonename": "zone-a",
            "serviceofferingid": "so-1",
            "serviceofferingname": "small",
            "templateid": "t-1",
            "templatename": "ubuntu-20.04",
            "nic": [{
                "id": "nic-1",
                "ipaddress": "10.1.1.10",
                "isdefault": true,
                "networkid": "net-1",
                "networkname": "web",
                "traffictype": "Guest",
                "type": "Isolated"
            }],
            "securitygroup": [{"id": "sg-1", "name": "default"}]
        }]})
    }

    #[tokio::test]
    async fn test_deploy_resolves_every_name() {
        let transport = FakeTransport::new();
        transport
            .reply("listZones", json!({"zone": [{"id": "z-1", "name": "zone-a"}]}))
            .reply(
                "listServiceOfferings",
                json!({"serviceoffering": [{"id": "so-1", "name": "small"}]}),
            )
            .reply(
                "listTemplates",
                json!({"template": [{"id": "t-1", "name": "ubuntu-20.04"}]}),
            )
            .reply("listNetworks", json!({"network": [{"id": "net-1", "name": "web"}]}))
            .reply("deployVirtualMachine", json!({"virtualmachine": {"id": "vm-1"}}))
            .reply("listVirtualMachines", listed_vm());

        let mut data = ResourceData::new(VirtualMachineFields {
            zone_name: String::from("zone-a"),
            service_offering_name: String::from("small"),
            template_name: String::from("ubuntu-20.04"),
            name: String::from("web-1"),
            user_data: String::from("#cloud-config"),
            network_names: BTreeSet::from([String::from("web")]),
            expunge: true,
            ..VirtualMachineFields::default()
        });

        Lifecycle::new(VirtualMachineResource)
            .create(&context(&transport), &mut data)
            .await
            .unwrap();

        let deploy = &transport.calls_to("deployVirtualMachine")[0];
        assert_eq!(deploy.get("templateid"), Some("t-1"));
        assert_eq!(deploy.get("networkids"), Some("net-1"));
        assert_eq!(deploy.get("userdata"), Some("I2Nsb3VkLWNvbmZpZw=="));

        let f = data.get();
        assert_eq!(f.nic.len(), 1);
        assert_eq!(f.nic[0].ip_address, "10.1.1.10");
        assert_eq!(f.network_ids, BTreeSet::from([String::from("net-1")]));
        assert_eq!(f.security_group_names, BTreeSet::from([String::from("default")]));
        assert!(f.expunge);
    }

    #[tokio::test]
    async fn test_delete_passes_expunge_flag() {
        let transport = FakeTransport::new();
        transport
            .reply("listVirtualMachines", listed_vm())
            .reply(
                "listVirtualMachines",
                json!({"virtualmachine": [{"id": "vm-1", "state": "Expunging"}]}),
            );

        let mut data = ResourceData::existing(
            "vm-1",
            VirtualMachineFields {
                expunge: true,
                ..VirtualMachineFields::default()
            },
        );
        Lifecycle::new(VirtualMachineResource)
            .delete(&context(&transport), &mut data)
            .await
            .unwrap();

        let destroy = &transport.calls_to("destroyVirtualMachine")[0];
        assert_eq!(destroy.get("expunge"), Some("true"));
        assert!(data.is_absent());
    }

    #[tokio::test]
    async fn test_update_sends_display_name_only() {
        let transport = FakeTransport::new();
        transport.reply("listVirtualMachines", listed_vm());

        let prior = VirtualMachineFields {
            display_name: String::from("Old"),
            ..VirtualMachineFields::default()
        };
        let desired = VirtualMachineFields {
            display_name: String::from("Web 1"),
            ..VirtualMachineFields::default()
        };
        let mut data = ResourceData::changed("vm-1", prior, desired);
        Lifecycle::new(VirtualMachineResource)
            .update(&context(&transport), &mut data)
            .await
            .unwrap();

        let update = &transport.calls_to("updateVirtualMachine")[0];
        assert_eq!(update.get("displayname"), Some("Web 1"));
        assert_eq!(update.len(), 2);
    }
}
