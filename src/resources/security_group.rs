//! Security group resource with ingress and egress rule sets.
//!
//! Rule changes are itemized: each removed rule is revoked by its own rule
//! id and each new rule is authorized against the group. Ingress is
//! reconciled before egress.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cloudstack::{self, ApiParams, created_id};
use crate::error::{Result, StackformError};
use crate::reconcile::{
    ApiContext, FieldSpec, ItemizedCalls, Resource, ResourceData, ResourceDescriptor,
    apply_itemized, diff,
};

use super::is_icmp;

/// Descriptor of the `security_group` type.
pub const DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
    type_tag: "security_group",
    fields: &[
        FieldSpec::scalar("name").required().force_new(),
        FieldSpec::scalar("description").force_new(),
        FieldSpec::set("ingress_rule"),
        FieldSpec::set("egress_rule"),
    ],
};

/// One security group rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityRule {
    /// Rule identifier assigned by the backend.
    pub id: String,
    /// Protocol: `tcp`, `udp` or `icmp`.
    pub protocol: String,
    /// Source (ingress) or destination (egress) CIDR.
    pub cidr: String,
    /// First port of the range.
    pub start_port: Option<u32>,
    /// Last port of the range.
    pub end_port: Option<u32>,
    /// ICMP code.
    pub icmp_code: Option<i32>,
    /// ICMP type.
    pub icmp_type: Option<i32>,
}

/// Identity of a rule: the attributes the backend is sent, never the id.
type RuleKey = (String, String, Option<u32>, Option<u32>, Option<i32>, Option<i32>);

impl SecurityRule {
    /// A missing end port means a single port, as authorized.
    fn key(&self) -> RuleKey {
        let protocol = self.protocol.to_lowercase();
        if is_icmp(&protocol) {
            (protocol, self.cidr.clone(), None, None, self.icmp_code, self.icmp_type)
        } else {
            let end_port = self.end_port.or(self.start_port);
            (protocol, self.cidr.clone(), self.start_port, end_port, None, None)
        }
    }

    fn from_remote(remote: &cloudstack::SecurityGroupRule) -> Self {
        Self {
            id: remote.rule_id.clone(),
            protocol: remote.protocol.clone(),
            cidr: remote.cidr.clone(),
            start_port: remote.start_port,
            end_port: remote.end_port,
            icmp_code: remote.icmp_code,
            icmp_type: remote.icmp_type,
        }
    }
}

/// Fields of a security group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityGroupFields {
    /// Group name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Ingress rules.
    pub ingress_rule: Vec<SecurityRule>,
    /// Egress rules.
    pub egress_rule: Vec<SecurityRule>,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    const fn revoke_command(self) -> &'static str {
        match self {
            Self::Ingress => "revokeSecurityGroupIngress",
            Self::Egress => "revokeSecurityGroupEgress",
        }
    }

    const fn authorize_command(self) -> &'static str {
        match self {
            Self::Ingress => "authorizeSecurityGroupIngress",
            Self::Egress => "authorizeSecurityGroupEgress",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

/// Reconciles one rule direction of group `group_id` from `old` to `new`.
async fn reconcile_rules(
    ctx: &ApiContext,
    group_id: &str,
    direction: Direction,
    old: &[SecurityRule],
    new: &[SecurityRule],
) -> Result<()> {
    let changes = diff(old, new, SecurityRule::key);
    if changes.is_empty() {
        return Ok(());
    }

    let revoke = |rule: &SecurityRule| -> Result<ApiParams> {
        if rule.id.is_empty() {
            return Err(StackformError::internal(format!(
                "{direction} rule {:?} has no id to revoke",
                rule.key()
            )));
        }
        Ok(ApiParams::new().with("id", &rule.id))
    };
    let authorize = |rule: &SecurityRule| {
        let mut params = ApiParams::new()
            .with("securitygroupid", group_id)
            .with("protocol", &rule.protocol)
            .with("cidrlist", &rule.cidr);
        if is_icmp(&rule.protocol) {
            params.set_opt("icmpcode", rule.icmp_code);
            params.set_opt("icmptype", rule.icmp_type);
        } else {
            params.set_opt("startport", rule.start_port);
            params.set_opt("endport", rule.end_port.or(rule.start_port));
        }
        params
    };

    let calls = ItemizedCalls {
        revoke: direction.revoke_command(),
        revoke_params: &revoke,
        authorize: direction.authorize_command(),
        authorize_params: &authorize,
    };
    apply_itemized(ctx, &changes, &calls).await
}

/// Adapter for security groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityGroupResource;

#[async_trait]
impl Resource for SecurityGroupResource {
    type Fields = SecurityGroupFields;
    type Remote = cloudstack::SecurityGroup;
    const DESCRIPTOR: &'static ResourceDescriptor = &DESCRIPTOR;

    async fn create_remote(&self, ctx: &ApiContext, data: &ResourceData<SecurityGroupFields>) -> Result<String> {
        let f = data.get();
        let mut params = ApiParams::new().with("name", &f.name);
        params.set_nonempty("description", &f.description);

        let response = ctx.call("createSecurityGroup", params).await?;
        created_id("createSecurityGroup", &response, "securitygroup")
    }

    async fn after_create(&self, ctx: &ApiContext, data: &ResourceData<SecurityGroupFields>) -> Result<()> {
        let f = data.get();
        reconcile_rules(ctx, data.id(), Direction::Ingress, &[], &f.ingress_rule).await?;
        reconcile_rules(ctx, data.id(), Direction::Egress, &[], &f.egress_rule).await
    }

    fn apply_remote(remote: &cloudstack::SecurityGroup, fields: &mut SecurityGroupFields) {
        fields.name.clone_from(&remote.name);
        fields.description.clone_from(&remote.description);
        fields.ingress_rule = remote.ingress_rules.iter().map(SecurityRule::from_remote).collect();
        fields.egress_rule = remote.egress_rules.iter().map(SecurityRule::from_remote).collect();
    }

    async fn update_remote(&self, ctx: &ApiContext, data: &ResourceData<SecurityGroupFields>) -> Result<()> {
        if data.has_change(|f| &f.ingress_rule) {
            let (old, new) = data.get_change(|f| &f.ingress_rule);
            reconcile_rules(ctx, data.id(), Direction::Ingress, old, new).await?;
        }
        if data.has_change(|f| &f.egress_rule) {
            let (old, new) = data.get_change(|f| &f.egress_rule);
            reconcile_rules(ctx, data.id(), Direction::Egress, old, new).await?;
        }
        Ok(())
    }

    async fn delete_remote(&self, ctx: &ApiContext, data: &ResourceData<SecurityGroupFields>) -> Result<()> {
        ctx.call("deleteSecurityGroup", ApiParams::new().with("id", data.id()))
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

    fn tcp(cidr: &str, port: u32) -> SecurityRule {
        SecurityRule {
            protocol: String::from("tcp"),
            cidr: cidr.to_string(),
            start_port: Some(port),
            end_port: Some(port),
            ..SecurityRule::default()
        }
    }

    fn group(ingress: Vec<SecurityRule>) -> SecurityGroupFields {
        SecurityGroupFields {
            name: String::from("web"),
            ingress_rule: ingress,
            ..SecurityGroupFields::default()
        }
    }

    fn ssh_with_id() -> SecurityRule {
        SecurityRule {
            id: String::from("rule-22"),
            ..tcp("0.0.0.0/0", 22)
        }
    }

    #[tokio::test]
    async fn test_adding_a_rule_authorizes_only_the_new_one() {
        let transport = FakeTransport::new();
        let data = ResourceData::changed(
            "sg-1",
            group(vec![ssh_with_id()]),
            group(vec![tcp("0.0.0.0/0", 22), tcp("10.0.0.0/8", 80)]),
        );

        SecurityGroupResource
            .update_remote(&context(&transport), &data)
            .await
            .unwrap();

        assert!(transport.calls_to("revokeSecurityGroupIngress").is_empty());
        let authorized = transport.calls_to("authorizeSecurityGroupIngress");
        assert_eq!(authorized.len(), 1);
        assert_eq!(authorized[0].get("cidrlist"), Some("10.0.0.0/8"));
        assert_eq!(authorized[0].get("startport"), Some("80"));
        assert_eq!(authorized[0].get("securitygroupid"), Some("sg-1"));
    }

    #[tokio::test]
    async fn test_single_port_rule_without_end_port_is_left_alone() {
        let transport = FakeTransport::new();
        let port_only = |cidr: &str, port: u32| SecurityRule {
            end_port: None,
            ..tcp(cidr, port)
        };
        let data = ResourceData::changed(
            "sg-1",
            group(vec![ssh_with_id()]),
            group(vec![port_only("0.0.0.0/0", 22), port_only("10.0.0.0/8", 80)]),
        );

        SecurityGroupResource
            .update_remote(&context(&transport), &data)
            .await
            .unwrap();

        assert_eq!(transport.commands(), vec!["authorizeSecurityGroupIngress"]);
        let authorized = &transport.calls_to("authorizeSecurityGroupIngress")[0];
        assert_eq!(authorized.get("startport"), Some("80"));
        assert_eq!(authorized.get("endport"), Some("80"));
    }

    #[test]
    fn test_rule_key_ignores_attributes_of_the_other_protocol_family() {
        let tcp_with_icmp = SecurityRule {
            icmp_type: Some(8),
            ..tcp("0.0.0.0/0", 443)
        };
        assert_eq!(tcp_with_icmp.key(), tcp("0.0.0.0/0", 443).key());

        let ping = SecurityRule {
            protocol: String::from("ICMP"),
            cidr: String::from("0.0.0.0/0"),
            icmp_type: Some(8),
            icmp_code: Some(0),
            ..SecurityRule::default()
        };
        let ping_with_port = SecurityRule {
            start_port: Some(1),
            protocol: String::from("icmp"),
            ..ping.clone()
        };
        assert_eq!(ping.key(), ping_with_port.key());
    }

    #[tokio::test]
    async fn test_clearing_rules_revokes_by_rule_id() {
        let transport = FakeTransport::new();
        let data = ResourceData::changed("sg-1", group(vec![ssh_with_id()]), group(vec![]));

        SecurityGroupResource
            .update_remote(&context(&transport), &data)
            .await
            .unwrap();

        assert!(transport.calls_to("authorizeSecurityGroupIngress").is_empty());
        let revoked = transport.calls_to("revokeSecurityGroupIngress");
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].get("id"), Some("rule-22"));
    }

    #[tokio::test]
    async fn test_create_authorizes_initial_rules_before_read() {
        let transport = FakeTransport::new();
        transport
            .reply("createSecurityGroup", json!({"securitygroup": {"id": "sg-1"}}))
            .reply(
                "listSecurityGroups",
                json!({"securitygroup": [{
                    "id": "sg-1",
                    "name": "web",
                    "ingressrule": [{
                        "ruleid": "rule-22",
                        "protocol": "tcp",
                        "cidr": "0.0.0.0/0",
                        "startport": 22,
                        "endport": 22
                    }],
                    "egressrule": [{
                        "ruleid": "rule-all",
                        "protocol": "icmp",
                        "cidr": "0.0.0.0/0",
                        "icmptype": -1,
                        "icmpcode": -1
                    }]
                }]}),
            );

        let mut desired = group(vec![tcp("0.0.0.0/0", 22)]);
        desired.egress_rule = vec![SecurityRule {
            protocol: String::from("icmp"),
            cidr: String::from("0.0.0.0/0"),
            icmp_code: Some(-1),
            icmp_type: Some(-1),
            ..SecurityRule::default()
        }];

        let mut data = ResourceData::new(desired);
        Lifecycle::new(SecurityGroupResource)
            .create(&context(&transport), &mut data)
            .await
            .unwrap();

        assert_eq!(
            transport.commands(),
            vec![
                "createSecurityGroup",
                "authorizeSecurityGroupIngress",
                "authorizeSecurityGroupEgress",
                "listSecurityGroups"
            ]
        );
        assert_eq!(data.get().ingress_rule, vec![ssh_with_id()]);
        assert_eq!(data.get().egress_rule[0].id, "rule-all");
        let egress = &transport.calls_to("authorizeSecurityGroupEgress")[0];
        assert_eq!(egress.get("icmptype"), Some("-1"));
        assert!(!egress.contains("startport"));
    }

    #[tokio::test]
    async fn test_failed_revoke_aborts_and_reads_back() {
        let transport = FakeTransport::new();
        transport
            .fail("revokeSecurityGroupIngress", "rule in use")
            .reply(
                "listSecurityGroups",
                json!({"securitygroup": [{"id": "sg-1", "name": "web", "ingressrule": [{
                    "ruleid": "rule-22", "protocol": "tcp", "cidr": "0.0.0.0/0",
                    "startport": 22, "endport": 22
                }]}]}),
            );

        let mut data = ResourceData::changed(
            "sg-1",
            group(vec![ssh_with_id()]),
            group(vec![tcp("10.0.0.0/8", 80)]),
        );
        let err = Lifecycle::new(SecurityGroupResource)
            .update(&context(&transport), &mut data)
            .await
            .unwrap_err();

        assert!(err.is_backend_unavailable());
        assert!(transport.calls_to("authorizeSecurityGroupIngress").is_empty());
        assert_eq!(data.get().ingress_rule, vec![ssh_with_id()]);
    }
}
