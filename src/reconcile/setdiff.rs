//! Set reconciliation.
//!
//! Computes add/remove lists between a previously observed and a desired
//! collection under a caller-supplied key, and issues the matching calls.
//! Removals always go out before additions.

use std::collections::HashSet;
use std::hash::Hash;
use tracing::debug;

use crate::cloudstack::ApiParams;
use crate::error::Result;

use super::context::ApiContext;

/// Items to add and to remove to turn one set into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T> {
    /// Items in the new set only.
    pub to_add: Vec<T>,
    /// Items in the old set only.
    pub to_remove: Vec<T>,
}

impl<T> SetDiff<T> {
    /// Returns true if nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

impl<T> Default for SetDiff<T> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: Vec::new(),
        }
    }
}

/// Diffs `old` against `new` by `key`.
///
/// Removed items are taken from `old` (so they keep their sub-identifiers)
/// and added items from `new`. Items whose key appears more than once in one
/// input are considered once, at their first occurrence.
pub fn diff<T, K, F>(old: &[T], new: &[T], key: F) -> SetDiff<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let old_keys: HashSet<K> = old.iter().map(&key).collect();
    let new_keys: HashSet<K> = new.iter().map(&key).collect();

    SetDiff {
        to_add: unique_outside(new, &old_keys, &key),
        to_remove: unique_outside(old, &new_keys, &key),
    }
}

fn unique_outside<T, K, F>(items: &[T], other: &HashSet<K>, key: &F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| {
            let k = key(*item);
            !other.contains(&k) && seen.insert(k)
        })
        .cloned()
        .collect()
}

/// Commands and parameter builders for itemized set changes.
///
/// Each removed item is revoked by its own sub-identifier and each added
/// item is authorized against the parent, one call per item.
pub struct ItemizedCalls<'a, T> {
    /// Command revoking one item.
    pub revoke: &'a str,
    /// Builds the revoke parameters; fails when the item has no sub-identifier.
    pub revoke_params: &'a (dyn Fn(&T) -> Result<ApiParams> + Sync),
    /// Command authorizing one item.
    pub authorize: &'a str,
    /// Builds the authorize parameters.
    pub authorize_params: &'a (dyn Fn(&T) -> ApiParams + Sync),
}

/// Applies an itemized diff: every revoke, then every authorize.
///
/// # Errors
///
/// Returns the first failing call's error; remaining calls are skipped.
pub async fn apply_itemized<T: Sync>(
    ctx: &ApiContext,
    diff: &SetDiff<T>,
    calls: &ItemizedCalls<'_, T>,
) -> Result<()> {
    for item in &diff.to_remove {
        let params = (calls.revoke_params)(item)?;
        debug!(command = calls.revoke, "Revoking set item");
        ctx.call(calls.revoke, params).await?;
    }

    for item in &diff.to_add {
        let params = (calls.authorize_params)(item);
        debug!(command = calls.authorize, "Authorizing set item");
        ctx.call(calls.authorize, params).await?;
    }

    Ok(())
}

/// Commands for membership changes submitted as whole lists.
#[derive(Debug, Clone)]
pub struct BatchedCalls<'a> {
    /// Command removing members.
    pub remove: &'a str,
    /// Command adding members.
    pub add: &'a str,
    /// Parameters shared by both calls, typically the parent identifier.
    pub base: ApiParams,
    /// Parameter carrying the comma-joined member list.
    pub list_param: &'a str,
}

/// Applies a membership diff: one removal call, then one addition call.
///
/// Empty lists issue no call.
///
/// # Errors
///
/// Returns the first failing call's error; a failed removal skips the
/// addition.
pub async fn apply_batched(
    ctx: &ApiContext,
    diff: &SetDiff<String>,
    calls: &BatchedCalls<'_>,
) -> Result<()> {
    if !diff.to_remove.is_empty() {
        let mut params = calls.base.clone();
        params.set_list(calls.list_param, &diff.to_remove);
        debug!(command = calls.remove, count = diff.to_remove.len(), "Removing members");
        ctx.call(calls.remove, params).await?;
    }

    if !diff.to_add.is_empty() {
        let mut params = calls.base.clone();
        params.set_list(calls.list_param, &diff.to_add);
        debug!(command = calls.add, count = diff.to_add.len(), "Adding members");
        ctx.call(calls.add, params).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, context};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_symmetric_difference() {
        let result = diff(&strings(&["A", "B", "C"]), &strings(&["B", "C", "D"]), Clone::clone);
        assert_eq!(result.to_add, strings(&["D"]));
        assert_eq!(result.to_remove, strings(&["A"]));
    }

    #[test]
    fn test_from_empty() {
        let result = diff(&[], &strings(&["X"]), Clone::clone);
        assert_eq!(result.to_add, strings(&["X"]));
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_identical_sets_are_empty() {
        let set = strings(&["A", "B"]);
        assert!(diff(&set, &set, Clone::clone).is_empty());

        let reordered = strings(&["B", "A"]);
        assert!(diff(&set, &reordered, Clone::clone).is_empty());
    }

    #[test]
    fn test_key_function_decides_equality() {
        let old = vec![("r-1", "tcp"), ("r-2", "udp")];
        let new = vec![("", "TCP"), ("", "icmp")];
        let result = diff(&old, &new, |(_, proto)| proto.to_lowercase());

        assert_eq!(result.to_remove, vec![("r-2", "udp")]);
        assert_eq!(result.to_add, vec![("", "icmp")]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let result = diff(&[], &strings(&["X", "X"]), Clone::clone);
        assert_eq!(result.to_add, strings(&["X"]));
    }

    #[tokio::test]
    async fn test_batched_removes_before_adds() {
        let transport = FakeTransport::new();
        let changes = diff(&strings(&["vm-1", "vm-2"]), &strings(&["vm-2", "vm-3", "vm-4"]), Clone::clone);
        let calls = BatchedCalls {
            remove: "removeFromLoadBalancerRule",
            add: "assignToLoadBalancerRule",
            base: ApiParams::new().with("id", "lb-1"),
            list_param: "virtualmachineids",
        };

        apply_batched(&context(&transport), &changes, &calls).await.unwrap();

        assert_eq!(
            transport.commands(),
            vec!["removeFromLoadBalancerRule", "assignToLoadBalancerRule"]
        );
        let add = &transport.calls_to("assignToLoadBalancerRule")[0];
        assert_eq!(add.get("virtualmachineids"), Some("vm-3,vm-4"));
        assert_eq!(add.get("id"), Some("lb-1"));
    }

    #[tokio::test]
    async fn test_itemized_aborts_on_first_failure() {
        let transport = FakeTransport::new();
        transport.fail("revokeThing", "denied");

        let changes = SetDiff {
            to_add: strings(&["c"]),
            to_remove: strings(&["a", "b"]),
        };
        let revoke = |item: &String| -> Result<ApiParams> { Ok(ApiParams::new().with("id", item)) };
        let authorize = |item: &String| ApiParams::new().with("value", item);
        let calls = ItemizedCalls {
            revoke: "revokeThing",
            revoke_params: &revoke,
            authorize: "authorizeThing",
            authorize_params: &authorize,
        };

        let err = apply_itemized(&context(&transport), &changes, &calls)
            .await
            .unwrap_err();
        assert!(err.is_backend_unavailable());
        assert_eq!(transport.commands(), vec!["revokeThing"]);
    }
}
