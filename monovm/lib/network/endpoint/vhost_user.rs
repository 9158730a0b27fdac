use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    hypervisor::{Hypervisor, VhostUserNetDevice, VmDevice},
    network::{unsupported, Endpoint, EndpointType, NetworkInfo, NetworkInterfacePair},
    MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An interface served by a vhost-user backend listening on a unix socket.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VhostUserEndpoint {
    id: String,
    socket_path: PathBuf,
    hard_addr: String,
    iface_name: String,
    properties: NetworkInfo,
    #[serde(default)]
    pci_addr: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VhostUserEndpoint {
    /// Returns the vhost-user socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates a vhost-user endpoint for the scanned interface served at `socket_path`.
pub fn create_vhost_user_endpoint(
    net_info: NetworkInfo,
    socket_path: impl Into<PathBuf>,
) -> VhostUserEndpoint {
    VhostUserEndpoint {
        id: uuid::Uuid::new_v4().to_string(),
        socket_path: socket_path.into(),
        hard_addr: net_info.iface.hardware_addr.clone(),
        iface_name: net_info.iface.name.clone(),
        properties: net_info,
        pci_addr: String::new(),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Endpoint for VhostUserEndpoint {
    fn properties(&self) -> &NetworkInfo {
        &self.properties
    }

    fn name(&self) -> &str {
        &self.iface_name
    }

    fn hardware_addr(&self) -> &str {
        &self.hard_addr
    }

    fn endpoint_type(&self) -> EndpointType {
        EndpointType::VhostUser
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
        hypervisor.add_device(VmDevice::VhostUserNet(VhostUserNetDevice {
            id: self.id.clone(),
            socket_path: self.socket_path.clone(),
            mac_address: self.hard_addr.clone(),
        }))
    }

    fn detach(&mut self, _netns_created: bool, _netns_path: &str) -> MonovmResult<()> {
        Ok(())
    }

    fn hot_attach(&mut self, _hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        Err(unsupported(EndpointType::VhostUser, "hot attach"))
    }

    fn hot_detach(
        &mut self,
        _hypervisor: &mut dyn Hypervisor,
        _netns_created: bool,
        _netns_path: &str,
    ) -> MonovmResult<()> {
        Err(unsupported(EndpointType::VhostUser, "hot detach"))
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
    };

    use super::*;

    #[test]
    fn test_vhost_user_attach_adds_socket_device() -> anyhow::Result<()> {
        let info = NetworkInfo {
            iface: LinkAttrs {
                name: "eth0".into(),
                hardware_addr: "02:00:ca:fe:00:02".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut endpoint = create_vhost_user_endpoint(info, "/tmp/vhostuser_10.0.0.2/vhu.sock");

        let mut mock = MockHypervisor::new();
        mock.create_sandbox(
            "sandbox",
            HypervisorConfig::builder()
                .kernel_path("/opt/vm/vmlinuz")
                .initrd_path("/opt/vm/initrd.img")
                .build(),
        )?;

        endpoint.attach(&mut mock)?;
        match mock.cold_devices() {
            [VmDevice::VhostUserNet(device)] => {
                assert_eq!(device.socket_path, endpoint.socket_path());
                assert_eq!(device.mac_address, "02:00:ca:fe:00:02");
                assert!(!device.id.is_empty());
            }
            other => panic!("unexpected devices: {other:?}"),
        }

        endpoint.detach(true, "/run/netns/any")?;

        Ok(())
    }
}
