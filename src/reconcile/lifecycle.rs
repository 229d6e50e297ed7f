//! Resource lifecycle controller.
//!
//! [`Lifecycle`] implements create, read, update and delete once for every
//! resource type. Each type plugs in through the [`Resource`] trait, which
//! only supplies field mappings and the type-specific API calls.
//!
//! Every mutation is followed by a read, so the fields left in
//! [`ResourceData`] always reflect what the backend reports rather than what
//! was requested.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, info, warn};

use crate::cloudstack::{ApiObject, ApiParams};
use crate::error::{ApiError, Operation, ReconcileError, Result, StackformError};

use super::context::ApiContext;
use super::data::ResourceData;
use super::descriptor::{FieldKind, ResourceDescriptor};
use super::fetch::fetch_by_id;

/// Per-type adapter driven by [`Lifecycle`].
#[async_trait]
pub trait Resource: Send + Sync {
    /// Typed field set of the resource.
    type Fields: Clone
        + Default
        + PartialEq
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync;

    /// API record the resource is read from.
    type Remote: ApiObject;

    /// Static description of the type.
    const DESCRIPTOR: &'static ResourceDescriptor;

    /// Extra list parameters needed to find the record.
    fn read_scope(_fields: &Self::Fields) -> ApiParams {
        ApiParams::new()
    }

    /// Issues the creation call and returns the new identifier.
    ///
    /// Name-only references are resolved here.
    async fn create_remote(&self, ctx: &ApiContext, data: &ResourceData<Self::Fields>)
    -> Result<String>;

    /// Runs after the creation call, before the terminal read.
    ///
    /// Types with set-valued or attachment fields apply them here, diffing
    /// against the empty prior state of a new instance.
    async fn after_create(&self, _ctx: &ApiContext, _data: &ResourceData<Self::Fields>) -> Result<()> {
        Ok(())
    }

    /// Writes the remote record into the fields.
    fn apply_remote(remote: &Self::Remote, fields: &mut Self::Fields);

    /// Reads data that lives outside the main record, such as memberships.
    async fn read_related(
        &self,
        _ctx: &ApiContext,
        _id: &str,
        _fields: &mut Self::Fields,
    ) -> Result<()> {
        Ok(())
    }

    /// Stages and issues the calls for changed mutable fields.
    async fn update_remote(&self, ctx: &ApiContext, data: &ResourceData<Self::Fields>) -> Result<()>;

    /// Issues the deletion call for a present instance.
    async fn delete_remote(&self, ctx: &ApiContext, data: &ResourceData<Self::Fields>) -> Result<()>;
}

/// Generic lifecycle controller for one resource type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lifecycle<R> {
    resource: R,
}

impl<R: Resource> Lifecycle<R> {
    /// Creates a controller over a resource adapter.
    pub const fn new(resource: R) -> Self {
        Self { resource }
    }

    /// Returns the type's descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &'static ResourceDescriptor {
        R::DESCRIPTOR
    }

    fn tag(&self) -> &'static str {
        R::DESCRIPTOR.type_tag
    }

    /// Creates the resource, then reads it back.
    ///
    /// A failed creation call leaves the instance absent. When a later step
    /// fails the identifier stays set, the fields are refreshed by a read,
    /// and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first error, wrapped with lifecycle context.
    pub async fn create(&self, ctx: &ApiContext, data: &mut ResourceData<R::Fields>) -> Result<()> {
        Self::check_required_identifiers(data.get())
            .map_err(|e| e.in_lifecycle(Operation::Create, self.tag(), ""))?;

        let id = self
            .resource
            .create_remote(ctx, data)
            .await
            .map_err(|e| e.in_lifecycle(Operation::Create, self.tag(), ""))?;

        if id.is_empty() {
            return Err(StackformError::from(ApiError::invalid_response(
                self.tag(),
                "creation returned an empty id",
            ))
            .in_lifecycle(Operation::Create, self.tag(), ""));
        }

        info!(resource_type = self.tag(), id = %id, "Created resource");
        data.set_id(id);

        let staged = self.resource.after_create(ctx, data).await;
        let read = self.read_fields(ctx, data).await;

        let id = data.id().to_string();
        staged
            .and(read)
            .map_err(|e| e.in_lifecycle(Operation::Create, self.tag(), &id))
    }

    /// Fails with `MissingReference` when a required identifier is empty.
    fn check_required_identifiers(fields: &R::Fields) -> Result<()> {
        let value = serde_json::to_value(fields)
            .map_err(|e| StackformError::internal(format!("Failed to inspect fields: {e}")))?;

        let identifiers = R::DESCRIPTOR
            .required_fields()
            .filter(|f| f.kind == FieldKind::Identifier);
        for spec in identifiers {
            let empty = value
                .get(spec.name)
                .is_none_or(|v| v.is_null() || v.as_str().is_some_and(str::is_empty));
            if empty {
                return Err(ReconcileError::missing(spec.name).into());
            }
        }
        Ok(())
    }

    /// Refreshes the fields from the backend.
    ///
    /// An absent object clears the identifier and leaves the fields alone.
    ///
    /// # Errors
    ///
    /// Returns backend or multiplicity errors, wrapped with lifecycle context.
    pub async fn read(&self, ctx: &ApiContext, data: &mut ResourceData<R::Fields>) -> Result<()> {
        let id = data.id().to_string();
        let result = self.read_fields(ctx, data).await;
        result.map_err(|e| e.in_lifecycle(Operation::Read, self.tag(), &id))
    }

    /// Applies changed mutable fields, then reads the resource back.
    ///
    /// The read runs even when a staged call fails, so a partial update is
    /// visible in the returned fields.
    ///
    /// # Errors
    ///
    /// Returns the update error if any, else the read error, wrapped with
    /// lifecycle context.
    pub async fn update(&self, ctx: &ApiContext, data: &mut ResourceData<R::Fields>) -> Result<()> {
        let id = data.id().to_string();
        if id.is_empty() {
            return Err(StackformError::internal("cannot update an absent resource")
                .in_lifecycle(Operation::Update, self.tag(), ""));
        }

        let staged = self.resource.update_remote(ctx, data).await;
        if let Err(e) = &staged {
            warn!(resource_type = self.tag(), id = %id, "Update failed, reading back: {e}");
        }
        let read = self.read_fields(ctx, data).await;

        staged
            .and(read)
            .map_err(|e| e.in_lifecycle(Operation::Update, self.tag(), &id))
    }

    /// Deletes the resource.
    ///
    /// Reads first; an absent instance returns immediately without any
    /// further call. After the deletion call a second read confirms removal.
    ///
    /// # Errors
    ///
    /// Returns the first error, wrapped with lifecycle context. A failed
    /// deletion call leaves the identifier set.
    pub async fn delete(&self, ctx: &ApiContext, data: &mut ResourceData<R::Fields>) -> Result<()> {
        let id = data.id().to_string();
        let result = self.delete_inner(ctx, data).await;
        result.map_err(|e| e.in_lifecycle(Operation::Delete, self.tag(), &id))
    }

    async fn delete_inner(&self, ctx: &ApiContext, data: &mut ResourceData<R::Fields>) -> Result<()> {
        if data.is_absent() {
            return Ok(());
        }

        self.read_fields(ctx, data).await?;
        if data.is_absent() {
            debug!(resource_type = self.tag(), "Already absent, nothing to delete");
            return Ok(());
        }

        let id = data.id().to_string();
        self.resource.delete_remote(ctx, data).await?;
        info!(resource_type = self.tag(), id = %id, "Deleted resource");

        self.read_fields(ctx, data).await?;
        if !data.is_absent() {
            warn!(
                resource_type = self.tag(),
                id = %id,
                "Resource still listed after deletion, forgetting it"
            );
            data.set_id("");
        }
        Ok(())
    }

    async fn read_fields(&self, ctx: &ApiContext, data: &mut ResourceData<R::Fields>) -> Result<()> {
        if data.is_absent() {
            return Ok(());
        }

        let id = data.id().to_string();
        let scope = R::read_scope(data.get());

        match fetch_by_id::<R::Remote>(ctx, &id, &scope).await? {
            None => {
                info!(resource_type = self.tag(), id = %id, "Resource no longer exists");
                data.set_id("");
            }
            Some(remote) => {
                R::apply_remote(&remote, data.fields_mut());
                self.resource
                    .read_related(ctx, &id, data.fields_mut())
                    .await?;
                debug!(resource_type = self.tag(), id = %id, "Read resource");
            }
        }
        Ok(())
    }
}
