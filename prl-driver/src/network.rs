//! Network adapter and host network types, and parsing of the JSON that
//! `prlctl`/`prlsrvctl` report for them.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Number of adapter slots a Parallels Desktop VM can use.
pub const PRODUCT_ADAPTER_SLOTS: usize = 8;

/// How an adapter attaches to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterKind {
    /// Attached to a host-only virtual network
    HostOnly { network: String },
    /// Bridged to a physical host interface
    Bridged { interface: String },
    /// The product's NAT network
    Shared,
}

/// Emulated network card model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicType {
    Virtio,
    E1000,
    Rtl,
}

impl NicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NicType::Virtio => "virtio",
            NicType::E1000 => "e1000",
            NicType::Rtl => "rtl",
        }
    }
}

/// Requested configuration for one adapter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAdapterSpec {
    pub slot: u8,
    pub kind: AdapterKind,
    pub mac_address: Option<String>,
    pub nic_type: Option<NicType>,
}

impl NetworkAdapterSpec {
    pub fn new(slot: u8, kind: AdapterKind) -> Self {
        Self {
            slot,
            kind,
            mac_address: None,
            nic_type: None,
        }
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    pub fn with_nic_type(mut self, nic_type: NicType) -> Self {
        self.nic_type = Some(nic_type);
        self
    }

    pub fn device_name(&self) -> String {
        format!("net{}", self.slot)
    }
}

/// An enabled adapter as reported in the VM's settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub kind: AdapterKind,
    pub mac_address: Option<String>,
}

/// A physical host interface that adapters can bridge to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgedInterface {
    pub name: String,
}

/// DHCP server range of a virtual network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpRange {
    pub server: Ipv4Addr,
    pub lower: Ipv4Addr,
    pub upper: Ipv4Addr,
}

/// Options for creating a host-only network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOnlyNetworkOptions {
    pub network_id: String,
    pub adapter_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dhcp: Option<DhcpRange>,
}

/// A virtual network on the host and the host-side adapter bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNetwork {
    pub name: String,
    pub bound_to: Option<String>,
    pub ip: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub dhcp: Option<DhcpRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A NAT port forwarding rule on the shared network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedPort {
    pub name: String,
    pub protocol: Protocol,
    pub host_port: u16,
    pub guest_port: u16,
    /// VM UUID (or guest IP) the rule forwards to
    pub target: Option<String>,
}

/// An entry of `prlsrvctl net list --json`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct VirtualNetwork {
    #[serde(rename = "Network ID", default)]
    pub id: String,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Bound To", default)]
    pub bound_to: Option<String>,
}

impl VirtualNetwork {
    pub fn is_host_only(&self) -> bool {
        self.kind == "host-only"
    }

    /// Index of the host adapter (`vnicN` or `Parallels Host-Only #N`) bound to this network.
    pub fn adapter_index(&self) -> Option<u32> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^(?:vnic|Parallels Host-Only #)(\d+)$")
                .expect("Hardcoded adapter regex pattern should always compile")
        });
        re.captures(self.bound_to.as_deref()?)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    }
}

/// Adapters from the `Hardware` section of a VM's settings, keyed by slot.
pub(crate) fn parse_adapters(settings: &Value) -> BTreeMap<u8, NetworkInterface> {
    let mut adapters = BTreeMap::new();
    let Some(hardware) = settings.get("Hardware").and_then(Value::as_object) else {
        return adapters;
    };

    for (device, params) in hardware {
        let Some(slot) = device.strip_prefix("net").and_then(|n| n.parse::<u8>().ok()) else {
            continue;
        };
        if !params.get("enabled").and_then(Value::as_bool).unwrap_or(true) {
            continue;
        }
        let iface = params
            .get("iface")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = match params.get("type").and_then(Value::as_str) {
            Some("shared") => AdapterKind::Shared,
            Some("host") => AdapterKind::HostOnly { network: iface },
            Some("bridged") => AdapterKind::Bridged { interface: iface },
            _ => continue,
        };
        let mac_address = params
            .get("mac")
            .and_then(Value::as_str)
            .map(str::to_string);
        adapters.insert(slot, NetworkInterface { kind, mac_address });
    }
    adapters
}

/// Host interfaces used by the VM's adapters (`iface` of every `netN` device).
pub(crate) fn adapter_ifaces(settings: &Value) -> Vec<String> {
    settings
        .get("Hardware")
        .and_then(Value::as_object)
        .map(|hardware| {
            hardware
                .iter()
                .filter(|(device, _)| device.starts_with("net"))
                .filter_map(|(_, params)| params.get("iface").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn ip_field(value: &Value, key: &str) -> Option<Ipv4Addr> {
    value.get(key)?.as_str()?.parse().ok()
}

/// Parse `prlsrvctl net info <id> --json`.
pub(crate) fn parse_network_info(name: &str, info: &Value) -> HostNetwork {
    let adapter = info.get("Parallels adapter").unwrap_or(&Value::Null);
    let dhcp = info.get("DHCPv4 server").and_then(|server| {
        Some(DhcpRange {
            server: ip_field(server, "Server address")?,
            lower: ip_field(server, "IP scope start address")?,
            upper: ip_field(server, "IP scope end address")?,
        })
    });
    HostNetwork {
        name: info
            .get("Network ID")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string(),
        bound_to: info
            .get("Bound To")
            .and_then(Value::as_str)
            .map(str::to_string),
        ip: ip_field(adapter, "IP address"),
        netmask: ip_field(adapter, "Subnet mask"),
        dhcp,
    }
}

/// Parse the `NAT server` rules of the shared network's info.
pub(crate) fn parse_forwarded_ports(info: &Value) -> Vec<ForwardedPort> {
    let Some(nat) = info.get("NAT server") else {
        return Vec::new();
    };

    let mut ports = Vec::new();
    for (section, protocol) in [("TCP rules", Protocol::Tcp), ("UDP rules", Protocol::Udp)] {
        let Some(rules) = nat.get(section).and_then(Value::as_object) else {
            continue;
        };
        for (name, params) in rules {
            let port = |key: &str| {
                params
                    .get(key)
                    .and_then(Value::as_u64)
                    .and_then(|p| u16::try_from(p).ok())
            };
            let (Some(host_port), Some(guest_port)) =
                (port("source port"), port("destination port"))
            else {
                continue;
            };
            ports.push(ForwardedPort {
                name: name.clone(),
                protocol,
                host_port,
                guest_port,
                target: params
                    .get("destination IP/VM id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_adapters_skips_disabled_and_unknown() {
        let settings = json!({
            "Hardware": {
                "net0": {"enabled": true, "type": "shared", "mac": "001C42B4B074"},
                "net1": {"enabled": true, "type": "host", "iface": "vnic2"},
                "net2": {"enabled": false, "type": "bridged", "iface": "en0"},
                "net3": {"type": "bridged", "iface": "en1"},
                "hdd0": {"enabled": true},
                "net4": {"type": "mystery"}
            }
        });
        let adapters = parse_adapters(&settings);
        assert_eq!(adapters.len(), 3);
        assert_eq!(adapters[&0].kind, AdapterKind::Shared);
        assert_eq!(adapters[&0].mac_address.as_deref(), Some("001C42B4B074"));
        assert_eq!(
            adapters[&1].kind,
            AdapterKind::HostOnly {
                network: "vnic2".into()
            }
        );
        assert_eq!(
            adapters[&3].kind,
            AdapterKind::Bridged {
                interface: "en1".into()
            }
        );
    }

    #[test]
    fn test_adapter_index() {
        let net = |bound: &str| VirtualNetwork {
            id: "n".into(),
            kind: "host-only".into(),
            bound_to: Some(bound.into()),
        };
        assert_eq!(net("vnic3").adapter_index(), Some(3));
        assert_eq!(net("Parallels Host-Only #4").adapter_index(), Some(4));
        assert_eq!(net("en0").adapter_index(), None);
    }

    #[test]
    fn test_parse_network_info() {
        let info = json!({
            "Network ID": "prl-net1",
            "Type": "host-only",
            "Bound To": "vnic2",
            "Parallels adapter": {"IP address": "10.37.130.2", "Subnet mask": "255.255.255.0"},
            "DHCPv4 server": {
                "Server address": "10.37.130.1",
                "IP scope start address": "10.37.130.10",
                "IP scope end address": "10.37.130.254"
            }
        });
        let net = parse_network_info("ignored", &info);
        assert_eq!(net.name, "prl-net1");
        assert_eq!(net.bound_to.as_deref(), Some("vnic2"));
        assert_eq!(net.ip, Some(Ipv4Addr::new(10, 37, 130, 2)));
        assert_eq!(net.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        let dhcp = net.dhcp.unwrap();
        assert_eq!(dhcp.lower, Ipv4Addr::new(10, 37, 130, 10));
    }

    #[test]
    fn test_parse_forwarded_ports() {
        let info = json!({
            "NAT server": {
                "TCP rules": {
                    "ssh": {"source port": 2222, "destination port": 22, "destination IP/VM id": "{uuid-1}"}
                },
                "UDP rules": {
                    "dns": {"source port": 5353, "destination port": 53, "destination IP/VM id": "{uuid-2}"},
                    "broken": {"source port": "x"}
                }
            }
        });
        let ports = parse_forwarded_ports(&info);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].protocol, Protocol::Tcp);
        assert_eq!(ports[0].host_port, 2222);
        assert_eq!(ports[0].target.as_deref(), Some("{uuid-1}"));
        assert_eq!(ports[1].protocol, Protocol::Udp);
        assert_eq!(ports[1].guest_port, 53);
    }

    #[test]
    fn test_no_nat_section_means_no_ports() {
        assert!(parse_forwarded_ports(&json!({"Type": "shared"})).is_empty());
    }
}
