//! Load balancer rule resource and its machine membership.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::cloudstack::{self, ApiParams, NamedRecord, created_id};
use crate::error::Result;
use crate::reconcile::{
    ApiContext, BatchedCalls, FieldSpec, Resource, ResourceData, ResourceDescriptor, SetDiff,
    apply_batched, diff,
};

/// Descriptor of the `load_balancer_rule` type.
pub const DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
    type_tag: "load_balancer_rule",
    fields: &[
        FieldSpec::scalar("name").required(),
        FieldSpec::scalar("algorithm").required(),
        FieldSpec::scalar("description").force_new(),
        FieldSpec::scalar("private_port").required().force_new(),
        FieldSpec::scalar("public_port").required().force_new(),
        FieldSpec::scalar("protocol").force_new(),
        FieldSpec::identifier("public_ip_id").required().force_new(),
        FieldSpec::set("virtual_machine_ids"),
    ],
};

/// Fields of a load balancer rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadBalancerRuleFields {
    /// Rule name.
    pub name: String,
    /// Balancing algorithm: `roundrobin`, `leastconn` or `source`.
    pub algorithm: String,
    /// Description.
    pub description: String,
    /// Port on the members.
    pub private_port: u32,
    /// Port on the public address.
    pub public_port: u32,
    /// Protocol.
    pub protocol: String,
    /// Public IP address the rule listens on.
    pub public_ip_id: String,
    /// Member machines.
    pub virtual_machine_ids: BTreeSet<String>,
}

/// Adapter for load balancer rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadBalancerRuleResource;

fn membership_diff(old: &BTreeSet<String>, new: &BTreeSet<String>) -> SetDiff<String> {
    let old: Vec<String> = old.iter().cloned().collect();
    let new: Vec<String> = new.iter().cloned().collect();
    diff(&old, &new, Clone::clone)
}

async fn apply_membership(ctx: &ApiContext, id: &str, changes: &SetDiff<String>) -> Result<()> {
    let calls = BatchedCalls {
        remove: "removeFromLoadBalancerRule",
        add: "assignToLoadBalancerRule",
        base: ApiParams::new().with("id", id),
        list_param: "virtualmachineids",
    };
    apply_batched(ctx, changes, &calls).await
}

#[async_trait]
impl Resource for LoadBalancerRuleResource {
    type Fields = LoadBalancerRuleFields;
    type Remote = cloudstack::LoadBalancerRule;
    const DESCRIPTOR: &'static ResourceDescriptor = &DESCRIPTOR;

    async fn create_remote(
        &self,
        ctx: &ApiContext,
        data: &ResourceData<LoadBalancerRuleFields>,
    ) -> Result<String> {
        let f = data.get();
        let mut params = ApiParams::new()
            .with("name", &f.name)
            .with("algorithm", &f.algorithm)
            .with("privateport", f.private_port)
            .with("publicport", f.public_port)
            .with("publicipid", &f.public_ip_id);
        params.set_nonempty("description", &f.description);
        params.set_nonempty("protocol", &f.protocol);

        let response = ctx.call("createLoadBalancerRule", params).await?;
        created_id("createLoadBalancerRule", &response, "loadbalancer")
    }

    async fn after_create(
        &self,
        ctx: &ApiContext,
        data: &ResourceData<LoadBalancerRuleFields>,
    ) -> Result<()> {
        let changes = membership_diff(&BTreeSet::new(), &data.get().virtual_machine_ids);
        apply_membership(ctx, data.id(), &changes).await
    }

    fn apply_remote(remote: &cloudstack::LoadBalancerRule, fields: &mut LoadBalancerRuleFields) {
        fields.name.clone_from(&remote.name);
        fields.algorithm.clone_from(&remote.algorithm);
        fields.description.clone_from(&remote.description);
        fields.private_port = remote.private_port.unwrap_or_default();
        fields.public_port = remote.public_port.unwrap_or_default();
        fields.public_ip_id.clone_from(&remote.public_ip_id);
        // Older API versions do not report the protocol.
        if !remote.protocol.is_empty() {
            fields.protocol.clone_from(&remote.protocol);
        }
    }

    async fn read_related(
        &self,
        ctx: &ApiContext,
        id: &str,
        fields: &mut LoadBalancerRuleFields,
    ) -> Result<()> {
        let members: Vec<NamedRecord> = ctx
            .list(
                "listLoadBalancerRuleInstances",
                "loadbalancerruleinstance",
                ApiParams::new().with("id", id),
            )
            .await?;
        fields.virtual_machine_ids = members.into_iter().map(|m| m.id).collect();
        Ok(())
    }

    async fn update_remote(
        &self,
        ctx: &ApiContext,
        data: &ResourceData<LoadBalancerRuleFields>,
    ) -> Result<()> {
        let f = data.get();

        let mut params = ApiParams::new();
        if data.has_change(|f| &f.name) {
            params.set("name", &f.name);
        }
        if data.has_change(|f| &f.algorithm) {
            params.set("algorithm", &f.algorithm);
        }
        if !params.is_empty() {
            params.set("id", data.id());
            ctx.call("updateLoadBalancerRule", params).await?;
        }

        let (old, new) = data.get_change(|f| &f.virtual_machine_ids);
        let changes = membership_diff(old, new);
        apply_membership(ctx, data.id(), &changes).await
    }

    async fn delete_remote(
        &self,
        ctx: &ApiContext,
        data: &ResourceData<LoadBalancerRuleFields>,
    ) -> Result<()> {
        ctx.call("deleteLoadBalancerRule", ApiParams::new().with("id", data.id()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use crate::reconcile::Lifecycle;
    use crate::testing::{FakeTransport, context};
    use serde_json::json;

    fn machines(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    fn rule(members: &[&str]) -> LoadBalancerRuleFields {
        LoadBalancerRuleFields {
            name: String::from("web"),
            algorithm: String::from("roundrobin"),
            private_port: 80,
            public_port: 80,
            public_ip_id: String::from("ip-1"),
            virtual_machine_ids: machines(members),
            ..LoadBalancerRuleFields::default()
        }
    }

    fn listed(algorithm: &str) -> serde_json::Value {
        json!({"loadbalancerrule": [{
            "id": "lb-1",
            "name": "web",
            "algorithm": algorithm,
            "privateport": "80",
            "publicport": "80",
            "publicipid": "ip-1"
        }]})
    }

    #[tokio::test]
    async fn test_create_assigns_members_in_one_call() {
        let transport = FakeTransport::new();
        transport
            .reply("createLoadBalancerRule", json!({"loadbalancer": {"id": "lb-1"}}))
            .reply("listLoadBalancerRules", listed("roundrobin"))
            .reply(
                "listLoadBalancerRuleInstances",
                json!({"loadbalancerruleinstance": [
                    {"id": "vm-1", "name": "web-1"},
                    {"id": "vm-2", "name": "web-2"}
                ]}),
            );

        let mut data = ResourceData::new(rule(&["vm-1", "vm-2"]));
        Lifecycle::new(LoadBalancerRuleResource)
            .create(&context(&transport), &mut data)
            .await
            .unwrap();

        let assigns = transport.calls_to("assignToLoadBalancerRule");
        assert_eq!(assigns.len(), 1);
        assert_eq!(assigns[0].get("virtualmachineids"), Some("vm-1,vm-2"));
        assert!(transport.calls_to("removeFromLoadBalancerRule").is_empty());
        assert_eq!(data.get(), &rule(&["vm-1", "vm-2"]));
    }

    #[tokio::test]
    async fn test_update_batches_scalars_and_membership() {
        let transport = FakeTransport::new();
        transport
            .reply("listLoadBalancerRules", listed("leastconn"))
            .reply(
                "listLoadBalancerRuleInstances",
                json!({"loadbalancerruleinstance": [{"id": "vm-2"}, {"id": "vm-3"}]}),
            );

        let desired = LoadBalancerRuleFields {
            algorithm: String::from("leastconn"),
            ..rule(&["vm-2", "vm-3"])
        };
        let mut data = ResourceData::changed("lb-1", rule(&["vm-1", "vm-2"]), desired.clone());
        Lifecycle::new(LoadBalancerRuleResource)
            .update(&context(&transport), &mut data)
            .await
            .unwrap();

        assert_eq!(
            transport.commands(),
            vec![
                "updateLoadBalancerRule",
                "removeFromLoadBalancerRule",
                "assignToLoadBalancerRule",
                "listLoadBalancerRules",
                "listLoadBalancerRuleInstances",
            ]
        );
        let update = &transport.calls_to("updateLoadBalancerRule")[0];
        assert_eq!(update.get("algorithm"), Some("leastconn"));
        assert!(!update.contains("name"));
        assert_eq!(
            transport.calls_to("removeFromLoadBalancerRule")[0].get("virtualmachineids"),
            Some("vm-1")
        );
        assert_eq!(data.get(), &desired);
    }

    #[tokio::test]
    async fn test_unchanged_membership_issues_no_calls() {
        let transport = FakeTransport::new();
        let data = ResourceData::existing("lb-1", rule(&["vm-1"]));

        LoadBalancerRuleResource
            .update_remote(&context(&transport), &data)
            .await
            .unwrap();

        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_description_change_forces_replacement() {
        assert!(DESCRIPTOR.is_force_new("description"));
        assert!(!DESCRIPTOR.is_force_new("algorithm"));
    }

    #[tokio::test]
    async fn test_description_is_never_sent_on_update() {
        let transport = FakeTransport::new();
        transport.reply("listLoadBalancerRules", listed("roundrobin"));

        let desired = LoadBalancerRuleFields {
            description: String::from("front door"),
            ..rule(&[])
        };
        let data = ResourceData::changed("lb-1", rule(&[]), desired);
        LoadBalancerRuleResource
            .update_remote(&context(&transport), &data)
            .await
            .unwrap();

        assert!(transport.calls_to("updateLoadBalancerRule").is_empty());
    }

    #[tokio::test]
    async fn test_empty_public_ip_fails_before_any_call() {
        let transport = FakeTransport::new();
        let mut data = ResourceData::new(LoadBalancerRuleFields {
            public_ip_id: String::new(),
            ..rule(&["vm-1"])
        });

        let err = Lifecycle::new(LoadBalancerRuleResource)
            .create(&context(&transport), &mut data)
            .await
            .unwrap_err();

        assert!(matches!(
            err.reconcile_error(),
            Some(ReconcileError::MissingReference { field }) if field == "public_ip_id"
        ));
        assert!(transport.commands().is_empty());
        assert!(data.id().is_empty());
    }
}
