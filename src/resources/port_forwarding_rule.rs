//! Port forwarding rule resource.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::cloudstack::{ApiParams, PortForwardingRule, created_id};
use crate::error::Result;
use crate::reconcile::{ApiContext, FieldSpec, Resource, ResourceData, ResourceDescriptor};

use super::split_cidrs;

/// Descriptor of the `port_forwarding_rule` type.
pub const DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
    type_tag: "port_forwarding_rule",
    fields: &[
        FieldSpec::identifier("ip_address_id").required().force_new(),
        FieldSpec::scalar("protocol").required().force_new(),
        FieldSpec::scalar("private_port").required().force_new(),
        FieldSpec::scalar("public_port").required().force_new(),
        FieldSpec::identifier("virtual_machine_id").required().force_new(),
        FieldSpec::set("cidr_list").force_new(),
        FieldSpec::scalar("private_end_port").force_new(),
        FieldSpec::scalar("public_end_port").force_new(),
        FieldSpec::scalar("open_firewall").force_new(),
    ],
};

/// Fields of a port forwarding rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortForwardingRuleFields {
    /// Public IP address the rule applies to.
    pub ip_address_id: String,
    /// Protocol: `tcp` or `udp`.
    pub protocol: String,
    /// Port on the machine.
    pub private_port: u32,
    /// Port on the public address.
    pub public_port: u32,
    /// Target machine.
    pub virtual_machine_id: String,
    /// Allowed source CIDRs.
    pub cidr_list: BTreeSet<String>,
    /// Last private port of a range.
    pub private_end_port: Option<u32>,
    /// Last public port of a range.
    pub public_end_port: Option<u32>,
    /// Also create the matching firewall rule.
    pub open_firewall: bool,
}

/// Adapter for port forwarding rules. Every field is force-new.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortForwardingRuleResource;

#[async_trait]
impl Resource for PortForwardingRuleResource {
    type Fields = PortForwardingRuleFields;
    type Remote = PortForwardingRule;
    const DESCRIPTOR: &'static ResourceDescriptor = &DESCRIPTOR;

    async fn create_remote(
        &self,
        ctx: &ApiContext,
        data: &ResourceData<PortForwardingRuleFields>,
    ) -> Result<String> {
        let f = data.get();
        let mut params = ApiParams::new()
            .with("ipaddressid", &f.ip_address_id)
            .with("protocol", &f.protocol)
            .with("privateport", f.private_port)
            .with("publicport", f.public_port)
            .with("virtualmachineid", &f.virtual_machine_id)
            .with("openfirewall", f.open_firewall);
        params.set_opt("privateendport", f.private_end_port);
        params.set_opt("publicendport", f.public_end_port);
        params.set_list("cidrlist", &f.cidr_list);

        let response = ctx.call("createPortForwardingRule", params).await?;
        created_id("createPortForwardingRule", &response, "portforwardingrule")
    }

    fn apply_remote(remote: &PortForwardingRule, fields: &mut PortForwardingRuleFields) {
        fields.ip_address_id.clone_from(&remote.ip_address_id);
        fields.protocol.clone_from(&remote.protocol);
        fields.private_port = remote.private_port.unwrap_or_default();
        fields.public_port = remote.public_port.unwrap_or_default();
        fields.virtual_machine_id.clone_from(&remote.virtual_machine_id);
        fields.cidr_list = split_cidrs(&remote.cidr_list);
        // Single-port rules echo the start port as end port.
        fields.private_end_port = remote
            .private_end_port
            .filter(|end| Some(*end) != remote.private_port);
        fields.public_end_port = remote
            .public_end_port
            .filter(|end| Some(*end) != remote.public_port);
    }

    async fn update_remote(
        &self,
        _ctx: &ApiContext,
        _data: &ResourceData<PortForwardingRuleFields>,
    ) -> Result<()> {
        Ok(())
    }

    async fn delete_remote(
        &self,
        ctx: &ApiContext,
        data: &ResourceData<PortForwardingRuleFields>,
    ) -> Result<()> {
        ctx.call("deletePortForwardingRule", ApiParams::new().with("id", data.id()))
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

    fn ssh_rule() -> PortForwardingRuleFields {
        PortForwardingRuleFields {
            ip_address_id: String::from("ip-1"),
            protocol: String::from("tcp"),
            private_port: 22,
            public_port: 2222,
            virtual_machine_id: String::from("vm-1"),
            open_firewall: true,
            ..PortForwardingRuleFields::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_read_through_fallback() {
        let transport = FakeTransport::new();
        transport
            .reply(
                "createPortForwardingRule",
                json!({"portforwardingrule": {"id": "pf-1"}}),
            )
            .fail("listPortForwardingRules", "scoped lookup broken")
            .reply(
                "listPortForwardingRules",
                json!({"portforwardingrule": [{
                    "id": "pf-1",
                    "ipaddressid": "ip-1",
                    "protocol": "tcp",
                    "privateport": "22",
                    "privateendport": "22",
                    "publicport": "2222",
                    "publicendport": "2222",
                    "virtualmachineid": "vm-1",
                    "cidrlist": ""
                }]}),
            );

        let mut data = ResourceData::new(ssh_rule());
        Lifecycle::new(PortForwardingRuleResource)
            .create(&context(&transport), &mut data)
            .await
            .unwrap();

        let create = &transport.calls_to("createPortForwardingRule")[0];
        assert_eq!(create.get("openfirewall"), Some("true"));
        assert!(!create.contains("cidrlist"));
        assert_eq!(data.id(), "pf-1");
        assert_eq!(data.get(), &ssh_rule());
        assert_eq!(transport.calls_to("listPortForwardingRules").len(), 2);
    }

    #[tokio::test]
    async fn test_empty_identifiers_fail_before_any_call() {
        for missing in ["ip_address_id", "virtual_machine_id"] {
            let transport = FakeTransport::new();
            let mut fields = ssh_rule();
            match missing {
                "ip_address_id" => fields.ip_address_id.clear(),
                _ => fields.virtual_machine_id.clear(),
            }

            let err = Lifecycle::new(PortForwardingRuleResource)
                .create(&context(&transport), &mut ResourceData::new(fields))
                .await
                .unwrap_err();

            assert!(matches!(
                err.reconcile_error(),
                Some(ReconcileError::MissingReference { field }) if field == missing
            ));
            assert!(transport.commands().is_empty());
        }
    }
}
