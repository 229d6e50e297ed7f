//! Read-by-identifier with an unscoped fallback.
//!
//! Some list commands intermittently fail when scoped to an identifier while
//! the unscoped listing still works. A failed scoped call is therefore
//! followed by one unscoped listing filtered locally by identifier.

use tracing::{debug, warn};

use crate::cloudstack::{ApiObject, ApiParams};
use crate::error::{ReconcileError, Result, StackformError};

use super::context::ApiContext;

/// Fetches the record of type `T` with identifier `id`.
///
/// `scope` carries extra list parameters that both paths need. Returns
/// `None` when the object does not exist (or is listed but gone), which the
/// caller treats as absent, not as an error. An empty identifier is absent
/// without any backend call.
///
/// # Errors
///
/// Returns the backend error when the scoped call fails and the fallback is
/// disabled or fails too, and `UnexpectedMultiplicity` when the fallback
/// listing holds several objects with this identifier.
pub async fn fetch_by_id<T: ApiObject>(
    ctx: &ApiContext,
    id: &str,
    scope: &ApiParams,
) -> Result<Option<T>> {
    if id.is_empty() {
        return Ok(None);
    }

    let mut params = list_params::<T>(scope);
    params.set("id", id);

    match ctx.list::<T>(T::LIST_COMMAND, T::RESPONSE_KEY, params).await {
        Ok(records) => Ok(pick_scoped(records, id)),
        Err(StackformError::Backend(e)) if ctx.unscoped_fallback() => {
            warn!(
                command = T::LIST_COMMAND,
                id,
                "Scoped lookup failed ({e}), falling back to unscoped listing"
            );
            let records = ctx
                .list::<T>(T::LIST_COMMAND, T::RESPONSE_KEY, list_params::<T>(scope))
                .await?;
            pick_unscoped(records, id)
        }
        Err(e) => Err(e),
    }
}

fn list_params<T: ApiObject>(scope: &ApiParams) -> ApiParams {
    let mut params = scope.clone();
    if T::LIST_ALL && !params.contains("listall") {
        params.set("listall", true);
    }
    params
}

/// Scoped path: several records for one id are logged and the first wins.
fn pick_scoped<T: ApiObject>(records: Vec<T>, id: &str) -> Option<T> {
    let mut matching: Vec<T> = records
        .into_iter()
        .filter(|r| r.id() == id && !r.is_gone())
        .collect();

    if matching.len() > 1 {
        warn!(
            command = T::LIST_COMMAND,
            id,
            count = matching.len(),
            "Scoped lookup returned several objects for one id, using the first"
        );
    }

    if matching.is_empty() {
        debug!(command = T::LIST_COMMAND, id, "Object not found");
        None
    } else {
        Some(matching.swap_remove(0))
    }
}

/// Fallback path: several records for one id are fatal.
fn pick_unscoped<T: ApiObject>(records: Vec<T>, id: &str) -> Result<Option<T>> {
    let mut matching: Vec<T> = records
        .into_iter()
        .filter(|r| r.id() == id && !r.is_gone())
        .collect();

    match matching.len() {
        0 => {
            debug!(command = T::LIST_COMMAND, id, "Object not found in unscoped listing");
            Ok(None)
        }
        1 => Ok(matching.pop()),
        count => Err(ReconcileError::UnexpectedMultiplicity {
            resource_type: T::RESPONSE_KEY.to_string(),
            id: id.to_string(),
            count,
        }
        .into()),
    }
}
