//! Firewall rule resource.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::cloudstack::{ApiParams, FirewallRule, created_id};
use crate::error::Result;
use crate::reconcile::{ApiContext, FieldSpec, Resource, ResourceData, ResourceDescriptor};

use super::{is_icmp, split_cidrs};

/// Descriptor of the `firewall_rule` type.
pub const DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
    type_tag: "firewall_rule",
    fields: &[
        FieldSpec::identifier("ip_address_id").required().force_new(),
        FieldSpec::scalar("protocol").required().force_new(),
        FieldSpec::set("cidr_list").force_new(),
        FieldSpec::scalar("start_port").force_new(),
        FieldSpec::scalar("end_port").force_new(),
        FieldSpec::scalar("icmp_code").force_new(),
        FieldSpec::scalar("icmp_type").force_new(),
    ],
};

/// Fields of a firewall rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirewallRuleFields {
    /// Public IP address the rule applies to.
    pub ip_address_id: String,
    /// Protocol: `tcp`, `udp` or `icmp`.
    pub protocol: String,
    /// Allowed source CIDRs.
    pub cidr_list: BTreeSet<String>,
    /// First port of the range.
    pub start_port: Option<u32>,
    /// Last port of the range.
    pub end_port: Option<u32>,
    /// ICMP code.
    pub icmp_code: Option<i32>,
    /// ICMP type.
    pub icmp_type: Option<i32>,
}

/// Adapter for firewall rules. Every field is force-new, so updates only read.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirewallRuleResource;

#[async_trait]
impl Resource for FirewallRuleResource {
    type Fields = FirewallRuleFields;
    type Remote = FirewallRule;
    const DESCRIPTOR: &'static ResourceDescriptor = &DESCRIPTOR;

    async fn create_remote(&self, ctx: &ApiContext, data: &ResourceData<FirewallRuleFields>) -> Result<String> {
        let f = data.get();
        let mut params = ApiParams::new()
            .with("ipaddressid", &f.ip_address_id)
            .with("protocol", &f.protocol);
        params.set_list("cidrlist", &f.cidr_list);

        if is_icmp(&f.protocol) {
            params.set_opt("icmpcode", f.icmp_code);
            params.set_opt("icmptype", f.icmp_type);
        } else {
            params.set_opt("startport", f.start_port);
            params.set_opt("endport", f.end_port.or(f.start_port));
        }

        let response = ctx.call("createFirewallRule", params).await?;
        created_id("createFirewallRule", &response, "firewallrule")
    }

    fn apply_remote(remote: &FirewallRule, fields: &mut FirewallRuleFields) {
        fields.ip_address_id.clone_from(&remote.ip_address_id);
        fields.protocol.clone_from(&remote.protocol);
        fields.cidr_list = split_cidrs(&remote.cidr_list);
        if is_icmp(&remote.protocol) {
            fields.icmp_code = remote.icmp_code;
            fields.icmp_type = remote.icmp_type;
        } else {
            fields.start_port = remote.start_port;
            fields.end_port = remote.end_port;
        }
    }

    async fn update_remote(&self, _ctx: &ApiContext, _data: &ResourceData<FirewallRuleFields>) -> Result<()> {
        Ok(())
    }

    async fn delete_remote(&self, ctx: &ApiContext, data: &ResourceData<FirewallRuleFields>) -> Result<()> {
        ctx.call("deleteFirewallRule", ApiParams::new().with("id", data.id()))
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

    #[tokio::test]
    async fn test_tcp_rule_sends_port_range() {
        let transport = FakeTransport::new();
        transport
            .reply("createFirewallRule", json!({"firewallrule": {"id": "fw-1"}}))
            .reply(
                "listFirewallRules",
                json!({"firewallrule": [{
                    "id": "fw-1",
                    "ipaddressid": "ip-1",
                    "protocol": "tcp",
                    "cidrlist": "10.0.0.0/8,0.0.0.0/0",
                    "startport": 8000,
                    "endport": 8080
                }]}),
            );

        let mut data = ResourceData::new(FirewallRuleFields {
            ip_address_id: String::from("ip-1"),
            protocol: String::from("tcp"),
            cidr_list: BTreeSet::from([String::from("0.0.0.0/0"), String::from("10.0.0.0/8")]),
            start_port: Some(8000),
            end_port: Some(8080),
            ..FirewallRuleFields::default()
        });
        let expected = data.get().clone();

        Lifecycle::new(FirewallRuleResource)
            .create(&context(&transport), &mut data)
            .await
            .unwrap();

        let create = &transport.calls_to("createFirewallRule")[0];
        assert_eq!(create.get("startport"), Some("8000"));
        assert_eq!(create.get("endport"), Some("8080"));
        assert_eq!(create.get("cidrlist"), Some("0.0.0.0/0,10.0.0.0/8"));
        assert!(!create.contains("icmptype"));
        assert_eq!(data.get(), &expected);
    }

    #[tokio::test]
    async fn test_icmp_rule_sends_code_and_type() {
        let transport = FakeTransport::new();
        transport.reply("createFirewallRule", json!({"id": "fw-2", "jobid": "job-1"}));

        let data = ResourceData::new(FirewallRuleFields {
            ip_address_id: String::from("ip-1"),
            protocol: String::from("ICMP"),
            icmp_code: Some(-1),
            icmp_type: Some(8),
            start_port: Some(22),
            ..FirewallRuleFields::default()
        });

        let id = FirewallRuleResource
            .create_remote(&context(&transport), &data)
            .await
            .unwrap();
        assert_eq!(id, "fw-2");

        let create = &transport.calls_to("createFirewallRule")[0];
        assert_eq!(create.get("icmpcode"), Some("-1"));
        assert_eq!(create.get("icmptype"), Some("8"));
        assert!(!create.contains("startport"));
    }

    #[tokio::test]
    async fn test_empty_ip_address_fails_before_any_call() {
        let transport = FakeTransport::new();
        let mut data = ResourceData::new(FirewallRuleFields {
            ip_address_id: String::new(),
            protocol: String::from("tcp"),
            start_port: Some(22),
            ..FirewallRuleFields::default()
        });

        let err = Lifecycle::new(FirewallRuleResource)
            .create(&context(&transport), &mut data)
            .await
            .unwrap_err();

        assert!(!err.is_backend_unavailable());
        assert!(matches!(
            err.reconcile_error(),
            Some(ReconcileError::MissingReference { field }) if field == "ip_address_id"
        ));
        assert!(transport.commands().is_empty());
    }
}
