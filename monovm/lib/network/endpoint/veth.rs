use serde::{Deserialize, Serialize};

use crate::{
    config::NetInterworkingModel,
    hypervisor::Hypervisor,
    network::{
        attach_pair, create_network_interface_pair, detach_pair, do_netns, pair_network_device,
        xconnect_vm_network, xdisconnect_vm_network, Endpoint, EndpointType, NetworkInfo,
        NetworkInterfacePair,
    },
    MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The namespace end of a veth pair, the usual shape of a CNI-provided interface.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VethEndpoint {
    net_pair: NetworkInterfacePair,
    properties: NetworkInfo,
    #[serde(default)]
    pci_addr: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the veth endpoint at position `idx`, wired with `model`.
///
/// ## Errors
///
/// Returns `InvalidEndpointIndex` if `idx` is negative.
pub fn create_veth_network_endpoint(
    idx: i32,
    if_name: &str,
    model: NetInterworkingModel,
) -> MonovmResult<VethEndpoint> {
    Ok(VethEndpoint {
        net_pair: create_network_interface_pair(idx, if_name, model)?,
        ..Default::default()
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Endpoint for VethEndpoint {
    fn properties(&self) -> &NetworkInfo {
        &self.properties
    }

    fn name(&self) -> &str {
        &self.net_pair.virt_iface.name
    }

    fn hardware_addr(&self) -> &str {
        &self.net_pair.tap_interface.tap_iface.hard_addr
    }

    fn endpoint_type(&self) -> EndpointType {
        EndpointType::Veth
    }

    fn pci_addr(&self) -> &str {
        &self.pci_addr
    }

    fn network_pair(&self) -> Option<&NetworkInterfacePair> {
        Some(&self.net_pair)
    }

    fn network_pair_mut(&mut self) -> Option<&mut NetworkInterfacePair> {
        Some(&mut self.net_pair)
    }

    fn set_properties(&mut self, properties: NetworkInfo) {
        self.properties = properties;
    }

    fn set_pci_addr(&mut self, pci_addr: String) {
        self.pci_addr = pci_addr;
    }

    fn attach(&mut self, hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        let name = self.net_pair.virt_iface.name.clone();
        attach_pair(&name, EndpointType::Veth, &mut self.net_pair, hypervisor)
    }

    fn detach(&mut self, netns_created: bool, netns_path: &str) -> MonovmResult<()> {
        detach_pair(EndpointType::Veth, &mut self.net_pair, netns_created, netns_path)
    }

    fn hot_attach(&mut self, hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        if let Err(e) = xconnect_vm_network(&mut self.net_pair, EndpointType::Veth, hypervisor) {
            tracing::error!(name = %self.name(), error = %e, "error bridging virtual endpoint");
            return Err(e);
        }

        let name = self.net_pair.virt_iface.name.clone();
        let device = pair_network_device(&name, EndpointType::Veth, &mut self.net_pair);

        if let Err(e) = hypervisor.hotplug_add_device(device) {
            tracing::error!(%name, error = %e, "error attaching virtual endpoint");
            return Err(e);
        }

        Ok(())
    }

    fn hot_detach(
        &mut self,
        hypervisor: &mut dyn Hypervisor,
        netns_created: bool,
        netns_path: &str,
    ) -> MonovmResult<()> {
        if !netns_created {
            return Ok(());
        }

        let pair = &mut self.net_pair;
        if let Err(e) = do_netns(netns_path, || {
            xdisconnect_vm_network(pair, EndpointType::Veth)
        }) {
            tracing::warn!(name = %self.name(), error = %e, "error un-bridging virtual endpoint");
        }

        let name = self.net_pair.virt_iface.name.clone();
        let device = pair_network_device(&name, EndpointType::Veth, &mut self.net_pair);

        if let Err(e) = hypervisor.hotplug_remove_device(device) {
            tracing::error!(%name, error = %e, "error detaching virtual endpoint");
            return Err(e);
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
