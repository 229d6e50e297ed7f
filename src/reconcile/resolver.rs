//! Identifier resolution.
//!
//! Turns a human-readable name into exactly one backend identifier by listing
//! candidates and filtering them client-side for exact name equality.

use std::fmt;
use tracing::{debug, trace};

use crate::cloudstack::{ApiParams, Named, NamedRecord};
use crate::error::{ReconcileError, Result};

use super::context::ApiContext;

/// Kinds of objects that can be referenced by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// Availability zone.
    Zone,
    /// Compute service offering.
    ServiceOffering,
    /// Network offering.
    NetworkOffering,
    /// Disk offering.
    DiskOffering,
    /// Executable template.
    Template,
    /// Guest network.
    Network,
    /// Security group.
    SecurityGroup,
    /// Virtual machine.
    VirtualMachine,
}

impl ReferenceKind {
    /// Returns the kind's tag as used in messages.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::ServiceOffering => "service offering",
            Self::NetworkOffering => "network offering",
            Self::DiskOffering => "disk offering",
            Self::Template => "template",
            Self::Network => "network",
            Self::SecurityGroup => "security group",
            Self::VirtualMachine => "virtual machine",
        }
    }

    /// Returns the list command for this kind.
    #[must_use]
    pub const fn list_command(self) -> &'static str {
        match self {
            Self::Zone => "listZones",
            Self::ServiceOffering => "listServiceOfferings",
            Self::NetworkOffering => "listNetworkOfferings",
            Self::DiskOffering => "listDiskOfferings",
            Self::Template => "listTemplates",
            Self::Network => "listNetworks",
            Self::SecurityGroup => "listSecurityGroups",
            Self::VirtualMachine => "listVirtualMachines",
        }
    }

    /// Returns the key of the record array in the list response.
    #[must_use]
    pub const fn response_key(self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::ServiceOffering => "serviceoffering",
            Self::NetworkOffering => "networkoffering",
            Self::DiskOffering => "diskoffering",
            Self::Template => "template",
            Self::Network => "network",
            Self::SecurityGroup => "securitygroup",
            Self::VirtualMachine => "virtualmachine",
        }
    }

    /// Builds the list parameters narrowing the search to `name`.
    ///
    /// The server-side name filter is fuzzy on most commands, so the result
    /// still needs exact filtering.
    #[must_use]
    pub fn list_params(self, name: &str) -> ApiParams {
        match self {
            Self::Template => ApiParams::new()
                .with("templatefilter", "executable")
                .with("name", name),
            Self::SecurityGroup => ApiParams::new()
                .with("securitygroupname", name)
                .with("listall", true),
            Self::Network | Self::VirtualMachine => {
                ApiParams::new().with("name", name).with("listall", true)
            }
            Self::Zone | Self::ServiceOffering | Self::NetworkOffering | Self::DiskOffering => {
                ApiParams::new().with("name", name)
            }
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Picks the single candidate whose name equals `name` exactly.
///
/// # Errors
///
/// Returns `NotFound` when nothing matches and `Ambiguous` when several
/// candidates share the name.
pub fn match_exact<'a, T: Named>(
    kind: ReferenceKind,
    name: &str,
    candidates: &'a [T],
) -> Result<&'a T> {
    let mut matches = candidates.iter().filter(|c| c.name() == name);

    match (matches.next(), matches.next()) {
        (Some(found), None) => Ok(found),
        (None, _) => Err(ReconcileError::NotFound {
            kind: kind.tag().to_string(),
            name: name.to_string(),
        }
        .into()),
        (Some(_), Some(_)) => Err(ReconcileError::Ambiguous {
            kind: kind.tag().to_string(),
            name: name.to_string(),
            count: candidates.iter().filter(|c| c.name() == name).count(),
        }
        .into()),
    }
}

/// Resolves `name` to the identifier of exactly one object of `kind`.
///
/// # Errors
///
/// Returns `MissingReference` for an empty name, `NotFound` or `Ambiguous`
/// from the exact-match filter, and the backend error if listing fails.
pub async fn resolve(ctx: &ApiContext, kind: ReferenceKind, name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(ReconcileError::missing(kind.tag()).into());
    }

    let candidates: Vec<NamedRecord> = ctx
        .list(kind.list_command(), kind.response_key(), kind.list_params(name))
        .await?;
    trace!(%kind, name, candidates = candidates.len(), "Listed resolution candidates");

    let found = match_exact(kind, name, &candidates)?;
    debug!(%kind, name, id = %found.id, "Resolved name");
    Ok(found.id.clone())
}

/// Resolves a reference given as an identifier and/or a name.
///
/// A non-empty identifier always wins and skips the backend entirely.
///
/// # Errors
///
/// Returns `MissingReference(field)` when both are empty, otherwise any
/// error of [`resolve`].
pub async fn resolve_reference(
    ctx: &ApiContext,
    kind: ReferenceKind,
    field: &str,
    id: &str,
    name: &str,
) -> Result<String> {
    if !id.is_empty() {
        return Ok(id.to_string());
    }
    if name.is_empty() {
        return Err(ReconcileError::missing(field).into());
    }
    resolve(ctx, kind, name).await
}

/// Resolves a reference during an update.
///
/// After a read both the identifier and its name alias hold remote values,
/// so the one the caller actually changed decides: a changed identifier is
/// used as is, otherwise the (possibly new) name is resolved.
///
/// # Errors
///
/// Same as [`resolve_reference`].
pub async fn resolve_changed_reference(
    ctx: &ApiContext,
    kind: ReferenceKind,
    field: &str,
    id_change: (&str, &str),
    name: &str,
) -> Result<String> {
    let (old_id, new_id) = id_change;
    if old_id != new_id && !new_id.is_empty() {
        return Ok(new_id.to_string());
    }
    if name.is_empty() {
        return resolve_reference(ctx, kind, field, new_id, name).await;
    }
    resolve(ctx, kind, name).await
}
