use serde::{Deserialize, Serialize};

use crate::{
    hypervisor::{Hypervisor, NetworkDevice, VmDevice},
    network::{
        create_macvtap_fds, unsupported, Endpoint, EndpointType, NetworkInfo, NetworkInterfacePair,
    },
    MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A macvtap interface provided by the network plugin, plugged into the VM as is.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MacvtapEndpoint {
    properties: NetworkInfo,
    #[serde(default)]
    pci_addr: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates a macvtap endpoint for the scanned interface.
pub fn create_macvtap_network_endpoint(net_info: NetworkInfo) -> MacvtapEndpoint {
    MacvtapEndpoint {
        properties: net_info,
        ..Default::default()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Endpoint for MacvtapEndpoint {
    fn properties(&self) -> &NetworkInfo {
        &self.properties
    }

    fn name(&self) -> &str {
        &self.properties.iface.name
    }

    fn hardware_addr(&self) -> &str {
        &self.properties.iface.hardware_addr
    }

    fn endpoint_type(&self) -> EndpointType {
        EndpointType::Macvtap
    }

    fn pci_addr(&self) -> &str {
        &self.pci_addr
    }

    fn network_pair(&self) -> Option<&NetworkInterfacePair> {
        None
    }

    fn network_pair_mut(&mut self) -> Option<&mut NetworkInterfacePair> {
        None
    }

    fn set_properties(&mut self, properties: NetworkInfo) {
        self.properties = properties;
    }

    fn set_pci_addr(&mut self, pci_addr: String) {
        self.pci_addr = pci_addr;
    }

    fn attach(&mut self, hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        let queues = *hypervisor.config().get_num_vcpus() as usize;
        let (vm_fds, vhost_fds) = create_macvtap_fds(
            self.properties.iface.index,
            queues,
            *hypervisor.config().get_disable_vhost_net(),
        )?;

        hypervisor.add_device(VmDevice::Network(NetworkDevice {
            id: self.properties.iface.name.clone(),
            name: self.properties.iface.name.clone(),
            mac_address: self.properties.iface.hardware_addr.clone(),
            host_device: self.properties.iface.name.clone(),
            endpoint_type: Some(EndpointType::Macvtap),
            vm_fds,
            vhost_fds,
            ..Default::default()
        }))
    }

    fn detach(&mut self, _netns_created: bool, _netns_path: &str) -> MonovmResult<()> {
        tracing::debug!(name = %self.name(), "detach for macvtap endpoint is a no-op");
        Ok(())
    }

    fn hot_attach(&mut self, _hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        Err(unsupported(EndpointType::Macvtap, "hot attach"))
    }

    fn hot_detach(
        &mut self,
        _hypervisor: &mut dyn Hypervisor,
        _netns_created: bool,
        _netns_path: &str,
    ) -> MonovmResult<()> {
        Err(unsupported(EndpointType::Macvtap, "hot detach"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{
        hypervisor::{HypervisorConfig, MockHypervisor},
        network::LinkAttrs,
        MonovmError,
    };

    use super::*;

    #[test_log::test]
    fn test_macvtap_attach_fails_without_device() -> anyhow::Result<()> {
        let mut endpoint = create_macvtap_network_endpoint(NetworkInfo {
            iface: LinkAttrs {
                index: u32::MAX,
                name: "macvtap0".into(),
                hardware_addr: "02:00:ca:fe:00:01".into(),
                link_type: "macvtap".into(),
                ..Default::default()
            },
            ..Default::default()
        });

        let mut mock = MockHypervisor::new();
        mock.create_sandbox(
            "sandbox",
            HypervisorConfig::builder()
                .kernel_path("/opt/vm/vmlinuz")
                .image_path("/opt/vm/rootfs.img")
                .build(),
        )?;

        assert_eq!(endpoint.name(), "macvtap0");
        assert_eq!(endpoint.hardware_addr(), "02:00:ca:fe:00:01");
        assert!(endpoint.network_pair().is_none());

        assert!(matches!(
            endpoint.attach(&mut mock),
            Err(MonovmError::DeviceOpen { .. })
        ));
        assert!(mock.cold_devices().is_empty());

        endpoint.detach(true, "")?;

        Ok(())
    }
}
