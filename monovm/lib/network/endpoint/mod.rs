//! Network endpoints: the interfaces of a sandbox namespace and how each kind reaches the VM.

mod ipvlan;
mod macvlan;
mod macvtap;
mod physical;
mod tap;
mod veth;
mod vhost_user;

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    hypervisor::{Hypervisor, NetworkDevice, VmDevice},
    network::{
        do_netns, xconnect_vm_network, xdisconnect_vm_network, NetworkInfo, NetworkInterfacePair,
    },
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use ipvlan::*;
pub use macvlan::*;
pub use macvtap::*;
pub use physical::*;
pub use tap::*;
pub use veth::*;
pub use vhost_user::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of an endpoint, as persisted alongside its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointType {
    /// A NIC passed through to the VM.
    #[serde(rename = "physical")]
    Physical,

    /// One end of a veth pair.
    #[serde(rename = "virtual")]
    Veth,

    /// A vhost-user backed interface.
    #[serde(rename = "vhost-user")]
    VhostUser,

    /// A macvlan interface in bridge mode.
    #[serde(rename = "macvlan")]
    BridgedMacvlan,

    /// A macvtap interface.
    #[serde(rename = "macvtap")]
    Macvtap,

    /// A TAP device created for the VM.
    #[serde(rename = "tap")]
    Tap,

    /// An ipvlan interface.
    #[serde(rename = "ipvlan")]
    IPVlan,
}

/// The operations every endpoint kind supports.
///
/// Cold attach adds the endpoint to the boot configuration of the VM, hot attach plugs it into
/// the running VM. Both expect to be called from inside the sandbox namespace. Detach enters
/// the namespace itself when it needs to. Failures abort the operation where they happen;
/// nothing is rolled back.
pub trait Endpoint {
    /// The scanned state of the interface.
    fn properties(&self) -> &NetworkInfo;

    /// The guest-visible interface name.
    fn name(&self) -> &str;

    /// The guest-visible MAC address.
    fn hardware_addr(&self) -> &str;

    /// The endpoint kind.
    fn endpoint_type(&self) -> EndpointType;

    /// The PCI address of the interface in the guest, empty until known.
    fn pci_addr(&self) -> &str;

    /// The interface pair, for the kinds that splice through one.
    fn network_pair(&self) -> Option<&NetworkInterfacePair>;

    /// Mutable access to the interface pair.
    fn network_pair_mut(&mut self) -> Option<&mut NetworkInterfacePair>;

    /// Replaces the scanned state.
    fn set_properties(&mut self, properties: NetworkInfo);

    /// Records the guest PCI address.
    fn set_pci_addr(&mut self, pci_addr: String);

    /// Wires the endpoint and adds it to the VM boot configuration.
    fn attach(&mut self, hypervisor: &mut dyn Hypervisor) -> MonovmResult<()>;

    /// Unwires the endpoint after the VM is gone.
    fn detach(&mut self, netns_created: bool, netns_path: &str) -> MonovmResult<()>;

    /// Wires the endpoint and plugs it into the running VM.
    fn hot_attach(&mut self, hypervisor: &mut dyn Hypervisor) -> MonovmResult<()>;

    /// Unplugs the endpoint from the running VM and unwires it.
    fn hot_detach(
        &mut self,
        hypervisor: &mut dyn Hypervisor,
        netns_created: bool,
        netns_path: &str,
    ) -> MonovmResult<()>;
}

/// Any endpoint.
#[derive(Debug, PartialEq)]
pub enum NetworkEndpoint {
    /// See [`PhysicalEndpoint`].
    Physical(PhysicalEndpoint),

    /// See [`VethEndpoint`].
    Veth(VethEndpoint),

    /// See [`VhostUserEndpoint`].
    VhostUser(VhostUserEndpoint),

    /// See [`BridgedMacvlanEndpoint`].
    BridgedMacvlan(BridgedMacvlanEndpoint),

    /// See [`MacvtapEndpoint`].
    Macvtap(MacvtapEndpoint),

    /// See [`TapEndpoint`].
    Tap(TapEndpoint),

    /// See [`IPVlanEndpoint`].
    IPVlan(IPVlanEndpoint),
}

/// An endpoint in its persisted form: its kind and its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedJsonEndpoint {
    /// The endpoint kind, kept as text so unknown kinds survive loading.
    #[serde(rename = "Type")]
    pub endpoint_type: String,

    /// The endpoint data.
    #[serde(rename = "Data")]
    pub data: serde_json::Value,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EndpointType {
    /// The kind of link the discovered side of the interface pair must have.
    pub fn virtual_link_type(&self) -> Option<&'static str> {
        match self {
            EndpointType::Veth => Some("veth"),
            EndpointType::BridgedMacvlan => Some("macvlan"),
            EndpointType::IPVlan => Some("ipvlan"),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            EndpointType::Physical => "physical",
            EndpointType::Veth => "virtual",
            EndpointType::VhostUser => "vhost-user",
            EndpointType::BridgedMacvlan => "macvlan",
            EndpointType::Macvtap => "macvtap",
            EndpointType::Tap => "tap",
            EndpointType::IPVlan => "ipvlan",
        }
    }
}

impl NetworkEndpoint {
    /// Returns the persisted form of the endpoint.
    pub fn to_typed_json(&self) -> MonovmResult<TypedJsonEndpoint> {
        let data = match self {
            NetworkEndpoint::Physical(e) => serde_json::to_value(e)?,
            NetworkEndpoint::Veth(e) => serde_json::to_value(e)?,
            NetworkEndpoint::VhostUser(e) => serde_json::to_value(e)?,
            NetworkEndpoint::BridgedMacvlan(e) => serde_json::to_value(e)?,
            NetworkEndpoint::Macvtap(e) => serde_json::to_value(e)?,
            NetworkEndpoint::Tap(e) => serde_json::to_value(e)?,
            NetworkEndpoint::IPVlan(e) => serde_json::to_value(e)?,
        };

        Ok(TypedJsonEndpoint {
            endpoint_type: self.endpoint_type().to_string(),
            data,
        })
    }

    fn inner(&self) -> &dyn Endpoint {
        match self {
            NetworkEndpoint::Physical(e) => e,
            NetworkEndpoint::Veth(e) => e,
            NetworkEndpoint::VhostUser(e) => e,
            NetworkEndpoint::BridgedMacvlan(e) => e,
            NetworkEndpoint::Macvtap(e) => e,
            NetworkEndpoint::Tap(e) => e,
            NetworkEndpoint::IPVlan(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Endpoint {
        match self {
            NetworkEndpoint::Physical(e) => e,
            NetworkEndpoint::Veth(e) => e,
            NetworkEndpoint::VhostUser(e) => e,
            NetworkEndpoint::BridgedMacvlan(e) => e,
            NetworkEndpoint::Macvtap(e) => e,
            NetworkEndpoint::Tap(e) => e,
            NetworkEndpoint::IPVlan(e) => e,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Rebuilds endpoints from their persisted form.
///
/// Entries of an unknown kind are logged and skipped.
///
/// ## Errors
///
/// Returns a `Json` error if the data of a known kind does not decode.
pub fn unmarshal_endpoints(typed: Vec<TypedJsonEndpoint>) -> MonovmResult<Vec<NetworkEndpoint>> {
    let mut endpoints = Vec::with_capacity(typed.len());

    for entry in typed {
        let Ok(endpoint_type) = entry.endpoint_type.parse::<EndpointType>() else {
            tracing::warn!(endpoint_type = %entry.endpoint_type, "ignoring unknown endpoint type");
            continue;
        };

        let endpoint = match endpoint_type {
            EndpointType::Physical => NetworkEndpoint::Physical(serde_json::from_value(entry.data)?),
            EndpointType::Veth => NetworkEndpoint::Veth(serde_json::from_value(entry.data)?),
            EndpointType::VhostUser => {
                NetworkEndpoint::VhostUser(serde_json::from_value(entry.data)?)
            }
            EndpointType::BridgedMacvlan => {
                NetworkEndpoint::BridgedMacvlan(serde_json::from_value(entry.data)?)
            }
            EndpointType::Macvtap => NetworkEndpoint::Macvtap(serde_json::from_value(entry.data)?),
            EndpointType::Tap => NetworkEndpoint::Tap(serde_json::from_value(entry.data)?),
            EndpointType::IPVlan => NetworkEndpoint::IPVlan(serde_json::from_value(entry.data)?),
        };

        tracing::debug!(%endpoint_type, name = %endpoint.name(), "endpoint unmarshalled");
        endpoints.push(endpoint);
    }

    Ok(endpoints)
}

/// Builds the network device handed to the hypervisor for a pair-backed endpoint, moving the
/// pair's descriptors into it.
pub(crate) fn pair_network_device(
    name: &str,
    endpoint_type: EndpointType,
    pair: &mut NetworkInterfacePair,
) -> VmDevice {
    let (vm_fds, vhost_fds) = pair.tap_interface.take_fds();

    VmDevice::Network(NetworkDevice {
        id: pair.tap_interface.id.clone(),
        name: name.to_string(),
        mac_address: pair.tap_interface.tap_iface.hard_addr.clone(),
        host_device: pair.tap_interface.tap_iface.name.clone(),
        endpoint_type: Some(endpoint_type),
        interworking_model: pair.interworking_model,
        vm_fds,
        vhost_fds,
    })
}

/// Cold attach shared by the pair-backed endpoints.
pub(crate) fn attach_pair(
    name: &str,
    endpoint_type: EndpointType,
    pair: &mut NetworkInterfacePair,
    hypervisor: &mut dyn Hypervisor,
) -> MonovmResult<()> {
    if let Err(e) = xconnect_vm_network(pair, endpoint_type, hypervisor) {
        tracing::error!(%name, %endpoint_type, error = %e, "error bridging endpoint");
        return Err(e);
    }

    hypervisor.add_device(pair_network_device(name, endpoint_type, pair))
}

/// Detach shared by the pair-backed endpoints. Namespaces the runtime did not create are left
/// alone.
pub(crate) fn detach_pair(
    endpoint_type: EndpointType,
    pair: &mut NetworkInterfacePair,
    netns_created: bool,
    netns_path: &str,
) -> MonovmResult<()> {
    if !netns_created {
        return Ok(());
    }

    do_netns(netns_path, || xdisconnect_vm_network(pair, endpoint_type))
}

pub(crate) fn unsupported(endpoint_type: EndpointType, operation: &str) -> MonovmError {
    MonovmError::Unsupported(format!("{endpoint_type} endpoint does not support {operation}"))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EndpointType {
    type Err = MonovmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "physical" => Ok(EndpointType::Physical),
            "virtual" => Ok(EndpointType::Veth),
            "vhost-user" => Ok(EndpointType::VhostUser),
            "macvlan" => Ok(EndpointType::BridgedMacvlan),
            "macvtap" => Ok(EndpointType::Macvtap),
            "tap" => Ok(EndpointType::Tap),
            "ipvlan" => Ok(EndpointType::IPVlan),
            _ => Err(MonovmError::UnknownEndpointType(s.to_string())),
        }
    }
}

impl Endpoint for NetworkEndpoint {
    fn properties(&self) -> &NetworkInfo {
        self.inner().properties()
    }

    fn name(&self) -> &str {
        self.inner().name()
    }

    fn hardware_addr(&self) -> &str {
        self.inner().hardware_addr()
    }

    fn endpoint_type(&self) -> EndpointType {
        self.inner().endpoint_type()
    }

    fn pci_addr(&self) -> &str {
        self.inner().pci_addr()
    }

    fn network_pair(&self) -> Option<&NetworkInterfacePair> {
        self.inner().network_pair()
    }

    fn network_pair_mut(&mut self) -> Option<&mut NetworkInterfacePair> {
        self.inner_mut().network_pair_mut()
    }

    fn set_properties(&mut self, properties: NetworkInfo) {
        self.inner_mut().set_properties(properties)
    }

    fn set_pci_addr(&mut self, pci_addr: String) {
        self.inner_mut().set_pci_addr(pci_addr)
    }

    fn attach(&mut self, hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        self.inner_mut().attach(hypervisor)
    }

    fn detach(&mut self, netns_created: bool, netns_path: &str) -> MonovmResult<()> {
        self.inner_mut().detach(netns_created, netns_path)
    }

    fn hot_attach(&mut self, hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        self.inner_mut().hot_attach(hypervisor)
    }

    fn hot_detach(
        &mut self,
        hypervisor: &mut dyn Hypervisor,
        netns_created: bool,
        netns_path: &str,
    ) -> MonovmResult<()> {
        self.inner_mut()
            .hot_detach(hypervisor, netns_created, netns_path)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
