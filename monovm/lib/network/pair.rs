use std::{fs::File, mem};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{config::NetInterworkingModel, network::AddrInfo, MonovmError, MonovmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One side of an interface pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// The interface name.
    pub name: String,

    /// The MAC address.
    pub hard_addr: String,

    /// Addresses parked here while the interface is wired into the VM.
    #[serde(default)]
    pub addrs: Vec<AddrInfo>,
}

/// The VM-facing side of an interface pair.
///
/// `vm_fds` and `vhost_fds` are filled while wiring and handed to the hypervisor on attach.
/// They are never persisted.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TapInterface {
    /// The pair identifier.
    pub id: String,

    /// The name of the bridge joining both sides, when there is one.
    pub name: String,

    /// The TAP or macvtap device the VM is plugged into.
    pub tap_iface: NetworkInterface,

    /// Queue descriptors of `tap_iface`.
    #[serde(skip)]
    pub vm_fds: Vec<File>,

    /// vhost-net descriptors, one per queue.
    #[serde(skip)]
    pub vhost_fds: Vec<File>,
}

/// A discovered interface and the TAP-side device that splices it into a VM.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterfacePair {
    /// The VM-facing side.
    pub tap_interface: TapInterface,

    /// The interface discovered in the namespace.
    pub virt_iface: NetworkInterface,

    /// How both sides are joined.
    pub interworking_model: NetInterworkingModel,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TapInterface {
    /// Moves the queue and vhost descriptors out, leaving none behind.
    pub fn take_fds(&mut self) -> (Vec<File>, Vec<File>) {
        (mem::take(&mut self.vm_fds), mem::take(&mut self.vhost_fds))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns a random locally administered unicast MAC address.
pub fn generate_random_private_mac() -> String {
    let mut buf = [0u8; 6];
    rand::rng().fill(&mut buf);

    // Locally administered, unicast.
    buf[0] = (buf[0] | 0x02) & 0xfe;

    format_mac(&buf)
}

/// Builds the interface pair for the endpoint at position `idx` of a namespace.
///
/// The bridge is named `br<idx>_kata`, the TAP `tap<idx>_kata` and the virtual interface
/// `eth<idx>` unless `if_name` is given. The virtual side gets a random private MAC.
///
/// ## Errors
///
/// Returns `InvalidEndpointIndex` if `idx` is negative.
///
/// ## Examples
///
/// ```
/// use monovm::{config::NetInterworkingModel, network::create_network_interface_pair};
///
/// let pair = create_network_interface_pair(2, "", NetInterworkingModel::Bridged)?;
/// assert_eq!(pair.tap_interface.name, "br2_kata");
/// assert_eq!(pair.tap_interface.tap_iface.name, "tap2_kata");
/// assert_eq!(pair.virt_iface.name, "eth2");
/// # Ok::<(), monovm::MonovmError>(())
/// ```
pub fn create_network_interface_pair(
    idx: i32,
    if_name: &str,
    interworking_model: NetInterworkingModel,
) -> MonovmResult<NetworkInterfacePair> {
    if idx < 0 {
        return Err(MonovmError::InvalidEndpointIndex(idx));
    }

    let virt_name = if if_name.is_empty() {
        format!("eth{idx}")
    } else {
        if_name.to_string()
    };

    Ok(NetworkInterfacePair {
        tap_interface: TapInterface {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("br{idx}_kata"),
            tap_iface: NetworkInterface {
                name: format!("tap{idx}_kata"),
                ..Default::default()
            },
            ..Default::default()
        },
        virt_iface: NetworkInterface {
            name: virt_name,
            hard_addr: generate_random_private_mac(),
            addrs: Vec::new(),
        },
        interworking_model,
    })
}

/// Formats raw MAC bytes as lowercase colon-separated hex.
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parses a colon-separated MAC address into its six bytes.
///
/// ## Errors
///
/// Returns `InvalidMacAddress` if `mac` is not six hex octets.
pub fn parse_mac(mac: &str) -> MonovmResult<Vec<u8>> {
    let bytes = mac
        .split(':')
        .map(|octet| match octet.len() {
            1 | 2 => u8::from_str_radix(octet, 16).ok(),
            _ => None,
        })
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| MonovmError::InvalidMacAddress(mac.to_string()))?;

    if bytes.len() != 6 {
        return Err(MonovmError::InvalidMacAddress(mac.to_string()));
    }

    Ok(bytes)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for TapInterface {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name && self.tap_iface == other.tap_iface
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
