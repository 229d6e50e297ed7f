//! CloudStack API records.
//!
//! Typed views over the JSON objects returned by the `list*` commands. Only
//! the attributes the resource adapters map are declared; everything else in
//! the response is ignored.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{ApiError, Result};

/// A record that carries a backend identifier.
pub trait Identified {
    /// Returns the backend identifier.
    fn id(&self) -> &str;
}

/// A record with a human-readable name, usable by the identifier resolver.
pub trait Named: Identified {
    /// Returns the record name.
    fn name(&self) -> &str;
}

/// A record type that can be listed and looked up by identifier.
pub trait ApiObject: Identified + DeserializeOwned + Send + Sync {
    /// `list*` command returning records of this type.
    const LIST_COMMAND: &'static str;
    /// Key of the record array inside the list response.
    const RESPONSE_KEY: &'static str;
    /// Whether list calls need `listall=true` to see every account's records.
    const LIST_ALL: bool = false;

    /// Returns true if the record is listed but no longer usable.
    fn is_gone(&self) -> bool {
        false
    }
}

/// Minimal `{id, name}` record used for name resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRecord {
    /// Backend identifier.
    pub id: String,
    /// Record name.
    #[serde(default)]
    pub name: String,
}

impl Identified for NamedRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Named for NamedRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A guest network.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Network {
    /// Network identifier.
    pub id: String,
    /// Network name.
    #[serde(default)]
    pub name: String,
    /// Display text.
    #[serde(default, rename = "displaytext")]
    pub display_text: String,
    /// Network offering identifier.
    #[serde(default, rename = "networkofferingid")]
    pub network_offering_id: String,
    /// Network offering name.
    #[serde(default, rename = "networkofferingname")]
    pub network_offering_name: String,
    /// Zone identifier.
    #[serde(default, rename = "zoneid")]
    pub zone_id: String,
    /// Zone name.
    #[serde(default, rename = "zonename")]
    pub zone_name: String,
    /// VLAN, only visible to administrators.
    #[serde(default)]
    pub vlan: String,
    /// Gateway address.
    #[serde(default)]
    pub gateway: String,
    /// Netmask.
    #[serde(default)]
    pub netmask: String,
    /// CIDR of the network.
    #[serde(default)]
    pub cidr: String,
}

impl Identified for Network {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ApiObject for Network {
    const LIST_COMMAND: &'static str = "listNetworks";
    const RESPONSE_KEY: &'static str = "network";
    const LIST_ALL: bool = true;
}

/// A public IP address.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicIpAddress {
    /// Address identifier.
    pub id: String,
    /// The address itself.
    #[serde(default, rename = "ipaddress")]
    pub ip_address: String,
    /// Zone identifier.
    #[serde(default, rename = "zoneid")]
    pub zone_id: String,
    /// Zone name.
    #[serde(default, rename = "zonename")]
    pub zone_name: String,
    /// Network the address is associated with.
    #[serde(default, rename = "associatednetworkid")]
    pub associated_network_id: String,
    /// Whether this is the network's source NAT address.
    #[serde(default, rename = "issourcenat")]
    pub is_source_nat: bool,
    /// Whether static NAT is enabled.
    #[serde(default, rename = "isstaticnat")]
    pub is_static_nat: bool,
    /// Machine bound through static NAT.
    #[serde(default, rename = "virtualmachineid")]
    pub virtual_machine_id: String,
}

impl Identified for PublicIpAddress {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ApiObject for PublicIpAddress {
    const LIST_COMMAND: &'static str = "listPublicIpAddresses";
    const RESPONSE_KEY: &'static str = "publicipaddress";
    const LIST_ALL: bool = true;
}

/// A firewall rule on a public IP address.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirewallRule {
    /// Rule identifier.
    pub id: String,
    /// Public IP address identifier.
    #[serde(default, rename = "ipaddressid")]
    pub ip_address_id: String,
    /// Protocol.
    #[serde(default)]
    pub protocol: String,
    /// Comma-separated source CIDRs.
    #[serde(default, rename = "cidrlist")]
    pub cidr_list: String,
    /// First port of the range.
    #[serde(default, rename = "startport", deserialize_with = "number_opt")]
    pub start_port: Option<u32>,
    /// Last port of the range.
    #[serde(default, rename = "endport", deserialize_with = "number_opt")]
    pub end_port: Option<u32>,
    /// ICMP code.
    #[serde(default, rename = "icmpcode", deserialize_with = "number_opt")]
    pub icmp_code: Option<i32>,
    /// ICMP type.
    #[serde(default, rename = "icmptype", deserialize_with = "number_opt")]
    pub icmp_type: Option<i32>,
}

impl Identified for FirewallRule {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ApiObject for FirewallRule {
    const LIST_COMMAND: &'static str = "listFirewallRules";
    const RESPONSE_KEY: &'static str = "firewallrule";
    const LIST_ALL: bool = true;
}

/// A port forwarding rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortForwardingRule {
    /// Rule identifier.
    pub id: String,
    /// Public IP address identifier.
    #[serde(default, rename = "ipaddressid")]
    pub ip_address_id: String,
    /// Protocol.
    #[serde(default)]
    pub protocol: String,
    /// Private port.
    #[serde(default, rename = "privateport", deserialize_with = "number_opt")]
    pub private_port: Option<u32>,
    /// Private end port.
    #[serde(default, rename = "privateendport", deserialize_with = "number_opt")]
    pub private_end_port: Option<u32>,
    /// Public port.
    #[serde(default, rename = "publicport", deserialize_with = "number_opt")]
    pub public_port: Option<u32>,
    /// Public end port.
    #[serde(default, rename = "publicendport", deserialize_with = "number_opt")]
    pub public_end_port: Option<u32>,
    /// Target machine.
    #[serde(default, rename = "virtualmachineid")]
    pub virtual_machine_id: String,
    /// Comma-separated source CIDRs.
    #[serde(default, rename = "cidrlist")]
    pub cidr_list: String,
}

impl Identified for PortForwardingRule {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ApiObject for PortForwardingRule {
    const LIST_COMMAND: &'static str = "listPortForwardingRules";
    const RESPONSE_KEY: &'static str = "portforwardingrule";
    const LIST_ALL: bool = true;
}

/// One ingress or egress rule of a security group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityGroupRule {
    /// Rule identifier.
    #[serde(default, rename = "ruleid")]
    pub rule_id: String,
    /// Protocol.
    #[serde(default)]
    pub protocol: String,
    /// Source or destination CIDR.
    #[serde(default)]
    pub cidr: String,
    /// First port of the range.
    #[serde(default, rename = "startport", deserialize_with = "number_opt")]
    pub start_port: Option<u32>,
    /// Last port of the range.
    #[serde(default, rename = "endport", deserialize_with = "number_opt")]
    pub end_port: Option<u32>,
    /// ICMP code.
    #[serde(default, rename = "icmpcode", deserialize_with = "number_opt")]
    pub icmp_code: Option<i32>,
    /// ICMP type.
    #[serde(default, rename = "icmptype", deserialize_with = "number_opt")]
    pub icmp_type: Option<i32>,
}

/// A security group with its rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityGroup {
    /// Group identifier.
    pub id: String,
    /// Group name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Ingress rules.
    #[serde(default, rename = "ingressrule")]
    pub ingress_rules: Vec<SecurityGroupRule>,
    /// Egress rules.
    #[serde(default, rename = "egressrule")]
    pub egress_rules: Vec<SecurityGroupRule>,
}

impl Identified for SecurityGroup {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ApiObject for SecurityGroup {
    const LIST_COMMAND: &'static str = "listSecurityGroups";
    const RESPONSE_KEY: &'static str = "securitygroup";
    const LIST_ALL: bool = true;
}

/// A network interface of a virtual machine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Nic {
    /// NIC identifier.
    pub id: String,
    /// Gateway.
    #[serde(default)]
    pub gateway: String,
    /// Address on the network.
    #[serde(default, rename = "ipaddress")]
    pub ip_address: String,
    /// Whether this is the default NIC.
    #[serde(default, rename = "isdefault")]
    pub is_default: bool,
    /// MAC address.
    #[serde(default, rename = "macaddress")]
    pub mac_address: String,
    /// Netmask.
    #[serde(default)]
    pub netmask: String,
    /// Network identifier.
    #[serde(default, rename = "networkid")]
    pub network_id: String,
    /// Network name.
    #[serde(default, rename = "networkname")]
    pub network_name: String,
    /// Traffic type.
    #[serde(default, rename = "traffictype")]
    pub traffic_type: String,
    /// NIC type.
    #[serde(default, rename = "type")]
    pub nic_type: String,
}

/// A virtual machine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VirtualMachine {
    /// Machine identifier.
    pub id: String,
    /// Host name.
    #[serde(default)]
    pub name: String,
    /// Display name.
    #[serde(default, rename = "displayname")]
    pub display_name: String,
    /// Machine state as reported by the API.
    #[serde(default)]
    pub state: String,
    /// Zone identifier.
    #[serde(default, rename = "zoneid")]
    pub zone_id: String,
    /// Zone name.
    #[serde(default, rename = "zonename")]
    pub zone_name: String,
    /// Service offering identifier.
    #[serde(default, rename = "serviceofferingid")]
    pub service_offering_id: String,
    /// Service offering name.
    #[serde(default, rename = "serviceofferingname")]
    pub service_offering_name: String,
    /// Template identifier.
    #[serde(default, rename = "templateid")]
    pub template_id: String,
    /// Template name.
    #[serde(default, rename = "templatename")]
    pub template_name: String,
    /// SSH key pair name.
    #[serde(default, rename = "keypair")]
    pub key_pair: String,
    /// Network interfaces.
    #[serde(default)]
    pub nic: Vec<Nic>,
    /// Security groups the machine belongs to.
    #[serde(default, rename = "securitygroup")]
    pub security_groups: Vec<NamedRecord>,
}

impl Identified for VirtualMachine {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ApiObject for VirtualMachine {
    const LIST_COMMAND: &'static str = "listVirtualMachines";
    const RESPONSE_KEY: &'static str = "virtualmachine";
    const LIST_ALL: bool = true;

    fn is_gone(&self) -> bool {
        matches!(self.state.as_str(), "Destroyed" | "Expunging")
    }
}

/// A data volume.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Volume {
    /// Volume identifier.
    pub id: String,
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// Disk offering identifier.
    #[serde(default, rename = "diskofferingid")]
    pub disk_offering_id: String,
    /// Disk offering name.
    #[serde(default, rename = "diskofferingname")]
    pub disk_offering_name: String,
    /// Size in bytes.
    #[serde(default, deserialize_with = "number_opt")]
    pub size: Option<u64>,
    /// Zone identifier.
    #[serde(default, rename = "zoneid")]
    pub zone_id: String,
    /// Zone name.
    #[serde(default, rename = "zonename")]
    pub zone_name: String,
    /// Machine the volume is attached to, empty when detached.
    #[serde(default, rename = "virtualmachineid")]
    pub virtual_machine_id: String,
}

impl Identified for Volume {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ApiObject for Volume {
    const LIST_COMMAND: &'static str = "listVolumes";
    const RESPONSE_KEY: &'static str = "volume";
    const LIST_ALL: bool = true;
}

/// A load balancer rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadBalancerRule {
    /// Rule identifier.
    pub id: String,
    /// Rule name.
    #[serde(default)]
    pub name: String,
    /// Balancing algorithm.
    #[serde(default)]
    pub algorithm: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Private port.
    #[serde(default, rename = "privateport", deserialize_with = "number_opt")]
    pub private_port: Option<u32>,
    /// Public port.
    #[serde(default, rename = "publicport", deserialize_with = "number_opt")]
    pub public_port: Option<u32>,
    /// Public IP address identifier.
    #[serde(default, rename = "publicipid")]
    pub public_ip_id: String,
    /// Protocol, reported by newer API versions only.
    #[serde(default)]
    pub protocol: String,
}

impl Identified for LoadBalancerRule {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ApiObject for LoadBalancerRule {
    const LIST_COMMAND: &'static str = "listLoadBalancerRules";
    const RESPONSE_KEY: &'static str = "loadbalancerrule";
    const LIST_ALL: bool = true;
}

/// Decodes the record array stored under `key` in a list response.
///
/// CloudStack omits the key entirely when nothing matched, so a missing key
/// decodes to an empty list.
///
/// # Errors
///
/// Returns an error if the array does not decode into `T`.
pub fn decode_list<T: DeserializeOwned>(
    command: &str,
    response: &serde_json::Value,
    key: &str,
) -> Result<Vec<T>> {
    match response.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(items) => serde_json::from_value(items.clone()).map_err(|e| {
            ApiError::invalid_response(command, format!("cannot decode '{key}': {e}")).into()
        }),
    }
}

/// Extracts the identifier of a newly created object.
///
/// Looks for `response[key].id` first, then `response.id`.
///
/// # Errors
///
/// Returns an error if no non-empty identifier is present.
pub fn created_id(command: &str, response: &serde_json::Value, key: &str) -> Result<String> {
    response
        .get(key)
        .and_then(|object| object.get("id"))
        .or_else(|| response.get("id"))
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_response(command, "no id in response").into())
}

/// Accepts a number given either as a JSON number or as a numeric string.
///
/// The API is inconsistent here: ports are strings on forwarding and load
/// balancer rules but numbers on firewall and security group rules.
fn number_opt<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Number(T),
        Text(String),
    }

    match Option::<Raw<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s.trim().parse().map(Some).map_err(D::Error::custom),
    }
}
