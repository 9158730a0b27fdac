use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The attributes of a kernel network link, as reported by netlink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAttrs {
    /// The interface index.
    pub index: u32,

    /// The interface name.
    pub name: String,

    /// The MAC address in `aa:bb:cc:dd:ee:ff` form, empty when the link has none.
    pub hardware_addr: String,

    /// The MTU.
    pub mtu: u32,

    /// The transmit queue length.
    pub tx_queue_len: u32,

    /// The index of the link this one is stacked on, 0 if none.
    pub parent_index: u32,

    /// The index of the bridge this link is enslaved to, 0 if none.
    pub controller_index: u32,

    /// The link kind: `veth`, `macvlan`, `macvtap`, `ipvlan`, `tap`, `bridge`, or `device` for
    /// plain hardware.
    pub link_type: String,

    /// Whether this is a loopback link.
    pub is_loopback: bool,
}

/// An address assigned to a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrInfo {
    /// The address together with its prefix.
    pub address: IpNetwork,

    /// The address label, often the interface name.
    #[serde(default)]
    pub label: String,
}

/// A route through a link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    /// The destination network, `None` for the default route.
    pub dest: Option<IpNetwork>,

    /// The next hop.
    pub gateway: Option<IpAddr>,

    /// The preferred source address.
    pub source: Option<IpAddr>,

    /// The output link index.
    pub link_index: u32,

    /// The route scope as defined by `rtnetlink(7)`.
    pub scope: u8,
}

/// DNS settings of an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsInfo {
    /// Name servers.
    #[serde(default)]
    pub servers: Vec<String>,

    /// The local domain.
    #[serde(default)]
    pub domain: String,

    /// Search domains.
    #[serde(default)]
    pub searches: Vec<String>,

    /// Resolver options.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Everything known about one interface of a network namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// The link itself.
    pub iface: LinkAttrs,

    /// Its addresses.
    #[serde(default)]
    pub addrs: Vec<AddrInfo>,

    /// The routes going out through it.
    #[serde(default)]
    pub routes: Vec<RouteInfo>,

    /// Its DNS settings.
    #[serde(default)]
    pub dns: DnsInfo,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AddrInfo {
    /// Creates an unlabelled address.
    pub fn new(address: IpNetwork) -> Self {
        Self {
            address,
            label: String::new(),
        }
    }
}
