use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4.
    V4,

    /// IPv6.
    V6,
}

/// An address the guest configures on an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    /// The address family.
    pub family: IpFamily,

    /// The address without prefix.
    pub address: String,

    /// The prefix length, in decimal.
    pub mask: String,
}

/// An interface as the guest agent configures it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// The device to configure.
    pub device: String,

    /// The name to give it.
    pub name: String,

    /// Its addresses.
    pub ip_addresses: Vec<IpAddress>,

    /// Its MTU.
    pub mtu: u64,

    /// Its MAC address.
    pub hw_addr: String,

    /// Its PCI address in the guest, when known.
    pub pci_addr: String,
}

/// A route as the guest agent configures it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// The destination network, empty for the default route.
    pub dest: String,

    /// The next hop, empty for on-link routes.
    pub gateway: String,

    /// The device the route goes through.
    pub device: String,

    /// The preferred source address.
    pub source: String,

    /// The route scope.
    pub scope: u32,
}
