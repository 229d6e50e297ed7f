//! Guest network resource.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cloudstack::{self, ApiParams, created_id};
use crate::error::Result;
use crate::reconcile::{
    ApiContext, FieldSpec, ReferenceKind, Resource, ResourceData, ResourceDescriptor,
    resolve_changed_reference, resolve_reference,
};

/// Descriptor of the `network` type.
pub const DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
    type_tag: "network",
    fields: &[
        FieldSpec::scalar("name").required(),
        FieldSpec::scalar("display_text").required(),
        FieldSpec::identifier("network_offering_id"),
        FieldSpec::name_alias("network_offering_name"),
        FieldSpec::identifier("zone_id").force_new(),
        FieldSpec::name_alias("zone_name").force_new(),
        FieldSpec::scalar("vlan").force_new(),
        FieldSpec::scalar("gateway").force_new(),
        FieldSpec::scalar("netmask").force_new(),
        FieldSpec::scalar("cidr").computed(),
    ],
};

/// Fields of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkFields {
    /// Network name.
    pub name: String,
    /// Display text.
    pub display_text: String,
    /// Network offering identifier.
    pub network_offering_id: String,
    /// Network offering name.
    pub network_offering_name: String,
    /// Zone identifier.
    pub zone_id: String,
    /// Zone name.
    pub zone_name: String,
    /// VLAN tag.
    pub vlan: String,
    /// Gateway address.
    pub gateway: String,
    /// Netmask.
    pub netmask: String,
    /// CIDR, reported by the backend.
    pub cidr: String,
}

/// Adapter for guest networks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkResource;

#[async_trait]
impl Resource for NetworkResource {
    type Fields = NetworkFields;
    type Remote = cloudstack::Network;
    const DESCRIPTOR: &'static ResourceDescriptor = &DESCRIPTOR;

    async fn create_remote(&self, ctx: &ApiContext, data: &ResourceData<NetworkFields>) -> Result<String> {
        let f = data.get();
        let zone_id = resolve_reference(ctx, ReferenceKind::Zone, "zone", &f.zone_id, &f.zone_name).await?;
        let offering_id = resolve_reference(
            ctx,
            ReferenceKind::NetworkOffering,
            "network_offering",
            &f.network_offering_id,
            &f.network_offering_name,
        )
        .await?;

        let mut params = ApiParams::new()
            .with("name", &f.name)
            .with("displaytext", &f.display_text)
            .with("networkofferingid", offering_id)
            .with("zoneid", zone_id);
        params.set_nonempty("vlan", &f.vlan);
        params.set_nonempty("gateway", &f.gateway);
        params.set_nonempty("netmask", &f.netmask);

        let response = ctx.call("createNetwork", params).await?;
        created_id("createNetwork", &response, "network")
    }

    fn apply_remote(remote: &cloudstack::Network, fields: &mut NetworkFields) {
        fields.name.clone_from(&remote.name);
        fields.display_text.clone_from(&remote.display_text);
        fields.network_offering_id.clone_from(&remote.network_offering_id);
        fields.network_offering_name.clone_from(&remote.network_offering_name);
        fields.zone_id.clone_from(&remote.zone_id);
        fields.zone_name.clone_from(&remote.zone_name);
        fields.gateway.clone_from(&remote.gateway);
        fields.netmask.clone_from(&remote.netmask);
        fields.cidr.clone_from(&remote.cidr);
        if !remote.vlan.is_empty() {
            fields.vlan.clone_from(&remote.vlan);
        }
    }

    async fn update_remote(&self, ctx: &ApiContext, data: &ResourceData<NetworkFields>) -> Result<()> {
        let f = data.get();
        let offering_changed = data.has_change(|f| &f.network_offering_id)
            || data.has_change(|f| &f.network_offering_name);

        if !(offering_changed
            || data.has_change(|f| &f.name)
            || data.has_change(|f| &f.display_text))
        {
            return Ok(());
        }

        let mut params = ApiParams::new()
            .with("id", data.id())
            .with("name", &f.name)
            .with("displaytext", &f.display_text);

        if offering_changed {
            let (old_id, new_id) = data.get_change(|f| &f.network_offering_id);
            let offering_id = resolve_changed_reference(
                ctx,
                ReferenceKind::NetworkOffering,
                "network_offering",
                (old_id, new_id),
                &f.network_offering_name,
            )
            .await?;
            params.set("networkofferingid", offering_id);
        }

        ctx.call("updateNetwork", params).await?;
        Ok(())
    }

    async fn delete_remote(&self, ctx: &ApiContext, data: &ResourceData<NetworkFields>) -> Result<()> {
        ctx.call("deleteNetwork", ApiParams::new().with("id", data.id()))
            .await?;
        Ok(())
    }
}
