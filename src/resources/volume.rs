//! Data volume resource, including attachment to a machine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cloudstack::{self, ApiParams, created_id};
use crate::error::Result;
use crate::reconcile::{
    ApiContext, FieldSpec, ReferenceKind, Resource, ResourceData, ResourceDescriptor,
    resolve_reference,
};

/// Bytes per GiB, the unit sizes are configured in.
const GIB: u64 = 1 << 30;

/// Descriptor of the `volume` type.
pub const DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
    type_tag: "volume",
    fields: &[
        FieldSpec::scalar("name").required().force_new(),
        FieldSpec::identifier("disk_offering_id").force_new(),
        FieldSpec::name_alias("disk_offering_name").force_new(),
        FieldSpec::scalar("size").force_new(),
        FieldSpec::identifier("zone_id").force_new(),
        FieldSpec::name_alias("zone_name").force_new(),
        FieldSpec::identifier("virtual_machine_id"),
        FieldSpec::scalar("is_attached"),
    ],
};

/// Fields of a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeFields {
    /// Volume name.
    pub name: String,
    /// Disk offering identifier.
    pub disk_offering_id: String,
    /// Disk offering name.
    pub disk_offering_name: String,
    /// Size in GiB, for custom-size offerings.
    pub size: Option<u64>,
    /// Zone identifier.
    pub zone_id: String,
    /// Zone name.
    pub zone_name: String,
    /// Machine to attach to.
    pub virtual_machine_id: String,
    /// Whether the volume should be attached.
    pub is_attached: bool,
}

impl VolumeFields {
    fn attached_to(&self) -> Option<&str> {
        (self.is_attached && !self.virtual_machine_id.is_empty())
            .then_some(self.virtual_machine_id.as_str())
    }
}

/// Adapter for data volumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeResource;

/// Moves the attachment from `prior` to `desired`: detach first, then attach.
async fn reconcile_attachment(
    ctx: &ApiContext,
    id: &str,
    prior: &VolumeFields,
    desired: &VolumeFields,
) -> Result<()> {
    let current = prior.attached_to();
    let wanted = desired.attached_to();

    if current.is_some() && current != wanted {
        info!(id, "Detaching volume");
        ctx.call("detachVolume", ApiParams::new().with("id", id))
            .await?;
    }

    if let Some(machine) = wanted {
        if current != wanted {
            info!(id, machine, "Attaching volume");
            let params = ApiParams::new()
                .with("id", id)
                .with("virtualmachineid", machine);
            ctx.call("attachVolume", params).await?;
        }
    }

    Ok(())
}

#[async_trait]
impl Resource for VolumeResource {
    type Fields = VolumeFields;
    type Remote = cloudstack::Volume;
    const DESCRIPTOR: &'static ResourceDescriptor = &DESCRIPTOR;

    async fn create_remote(&self, ctx: &ApiContext, data: &ResourceData<VolumeFields>) -> Result<String> {
        let f = data.get();
        let offering_id = resolve_reference(
            ctx,
            ReferenceKind::DiskOffering,
            "disk_offering",
            &f.disk_offering_id,
            &f.disk_offering_name,
        )
        .await?;
        let zone_id = resolve_reference(ctx, ReferenceKind::Zone, "zone", &f.zone_id, &f.zone_name).await?;

        let mut params = ApiParams::new()
            .with("name", &f.name)
            .with("diskofferingid", offering_id)
            .with("zoneid", zone_id);
        params.set_opt("size", f.size);

        let response = ctx.call("createVolume", params).await?;
        created_id("createVolume", &response, "volume")
    }

    async fn after_create(&self, ctx: &ApiContext, data: &ResourceData<VolumeFields>) -> Result<()> {
        reconcile_attachment(ctx, data.id(), &VolumeFields::default(), data.get()).await
    }

    fn apply_remote(remote: &cloudstack::Volume, fields: &mut VolumeFields) {
        fields.name.clone_from(&remote.name);
        fields.disk_offering_id.clone_from(&remote.disk_offering_id);
        fields.disk_offering_name.clone_from(&remote.disk_offering_name);
        fields.zone_id.clone_from(&remote.zone_id);
        fields.zone_name.clone_from(&remote.zone_name);
        fields.size = remote.size.map(|bytes| bytes / GIB);
        fields.virtual_machine_id.clone_from(&remote.virtual_machine_id);
        fields.is_attached = !remote.virtual_machine_id.is_empty();
    }

    async fn update_remote(&self, ctx: &ApiContext, data: &ResourceData<VolumeFields>) -> Result<()> {
        if data.has_change(|f| &f.is_attached) || data.has_change(|f| &f.virtual_machine_id) {
            reconcile_attachment(ctx, data.id(), data.prior(), data.get()).await?;
        }
        Ok(())
    }

    async fn delete_remote(&self, ctx: &ApiContext, data: &ResourceData<VolumeFields>) -> Result<()> {
        if data.get().is_attached {
            info!(id = data.id(), "Detaching volume before deletion");
            ctx.call("detachVolume", ApiParams::new().with("id", data.id()))
                .await?;
        }
        ctx.call("deleteVolume", ApiParams::new().with("id", data.id()))
            .await?;
        Ok(())
    }
}
