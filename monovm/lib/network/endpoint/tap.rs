use serde::{Deserialize, Serialize};

use crate::{
    hypervisor::{Hypervisor, NetworkDevice, VmDevice},
    network::{
        create_tap, create_vhost_fds, do_netns, link_of_type, Endpoint, EndpointType, NetlinkHandle,
        NetworkInfo, NetworkInterface, NetworkInterfacePair, TapInterface,
    },
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A TAP device the runtime creates for an interface plugged into a running VM.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TapEndpoint {
    tap_interface: TapInterface,
    properties: NetworkInfo,
    #[serde(default)]
    pci_addr: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TapEndpoint {
    /// Returns the TAP side of the endpoint.
    pub fn tap_interface(&self) -> &TapInterface {
        &self.tap_interface
    }

    /// Creates the TAP device in the current namespace and brings it up with the MTU of the
    /// scanned interface, whose MAC is kept for the guest.
    fn tap_network(&mut self, num_vcpus: usize, disable_vhost_net: bool) -> MonovmResult<()> {
        let netlink = NetlinkHandle::new()?;
        let tap_name = self.tap_interface.tap_iface.name.clone();

        let vm_fds = create_tap(&tap_name, num_vcpus)?;
        let tap_link = link_of_type(&netlink, &tap_name, "tap")?;
        let vhost_fds = if disable_vhost_net {
            Vec::new()
        } else {
            create_vhost_fds(num_vcpus)?
        };

        netlink.set_mtu(tap_link.index, self.properties.iface.mtu)?;
        netlink.set_up(tap_link.index)?;

        self.tap_interface.tap_iface.hard_addr = self.properties.iface.hardware_addr.clone();
        self.tap_interface.vm_fds = vm_fds;
        self.tap_interface.vhost_fds = vhost_fds;

        Ok(())
    }

    fn network_device(&mut self) -> VmDevice {
        let (vm_fds, vhost_fds) = self.tap_interface.take_fds();

        VmDevice::Network(NetworkDevice {
            id: self.tap_interface.id.clone(),
            name: self.tap_interface.name.clone(),
            mac_address: self.tap_interface.tap_iface.hard_addr.clone(),
            host_device: self.tap_interface.tap_iface.name.clone(),
            endpoint_type: Some(EndpointType::Tap),
            vm_fds,
            vhost_fds,
            ..Default::default()
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the TAP endpoint at position `idx`.
///
/// The guest interface is named `eth<idx>` unless `if_name` is given, and the TAP device
/// `tap<idx>_kata`.
///
/// ## Errors
///
/// Returns `InvalidEndpointIndex` if `idx` is negative.
pub fn create_tap_network_endpoint(idx: i32, if_name: &str) -> MonovmResult<TapEndpoint> {
    if idx < 0 {
        return Err(MonovmError::InvalidEndpointIndex(idx));
    }

    let name = if if_name.is_empty() {
        format!("eth{idx}")
    } else {
        if_name.to_string()
    };

    Ok(TapEndpoint {
        tap_interface: TapInterface {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            tap_iface: NetworkInterface {
                name: format!("tap{idx}_kata"),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    })
}

/// Brings a TAP device down and deletes it.
fn untap_network(name: &str) -> MonovmResult<()> {
    let netlink = NetlinkHandle::new()?;
    let tap_link = link_of_type(&netlink, name, "tap")?;

    netlink.set_down(tap_link.index)?;
    netlink.delete_link(tap_link.index)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Endpoint for TapEndpoint {
    fn properties(&self) -> &NetworkInfo {
        &self.properties
    }

    fn name(&self) -> &str {
        &self.tap_interface.name
    }

    fn hardware_addr(&self) -> &str {
        &self.tap_interface.tap_iface.hard_addr
    }

    fn endpoint_type(&self) -> EndpointType {
        EndpointType::Tap
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

    fn attach(&mut self, _hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        Err(MonovmError::Unsupported(
            "tap endpoint does not support attach, if you're using docker please use --net none"
                .to_string(),
        ))
    }

    fn detach(&mut self, netns_created: bool, netns_path: &str) -> MonovmResult<()> {
        if !netns_created && !netns_path.is_empty() {
            return Ok(());
        }

        let name = self.tap_interface.tap_iface.name.clone();
        do_netns(netns_path, || untap_network(&name))
    }

    fn hot_attach(&mut self, hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        let num_vcpus = *hypervisor.config().get_num_vcpus() as usize;
        let disable_vhost_net = *hypervisor.config().get_disable_vhost_net();

        if let Err(e) = self.tap_network(num_vcpus, disable_vhost_net) {
            tracing::error!(name = %self.name(), error = %e, "error bridging tap endpoint");
            return Err(e);
        }

        if let Err(e) = hypervisor.hotplug_add_device(self.network_device()) {
            tracing::error!(name = %self.name(), error = %e, "error attaching tap endpoint");
            return Err(e);
        }

        Ok(())
    }

    fn hot_detach(
        &mut self,
        hypervisor: &mut dyn Hypervisor,
        _netns_created: bool,
        netns_path: &str,
    ) -> MonovmResult<()> {
        let name = self.tap_interface.tap_iface.name.clone();
        if let Err(e) = do_netns(netns_path, || untap_network(&name)) {
            tracing::warn!(%name, error = %e, "error un-bridging tap endpoint");
        }

        if let Err(e) = hypervisor.hotplug_remove_device(self.network_device()) {
            tracing::error!(name = %self.name(), error = %e, "error detaching tap endpoint");
            return Err(e);
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::hypervisor::MockHypervisor;

    use super::*;

    #[test]
    fn test_create_tap_endpoint() -> anyhow::Result<()> {
        let endpoint = create_tap_network_endpoint(2, "")?;
        assert_eq!(endpoint.endpoint_type(), EndpointType::Tap);
        assert_eq!(endpoint.name(), "eth2");
        assert_eq!(endpoint.tap_interface().tap_iface.name, "tap2_kata");
        assert!(endpoint.network_pair().is_none());

        let named = create_tap_network_endpoint(2, "net0")?;
        assert_eq!(named.name(), "net0");
        assert_eq!(named.tap_interface().tap_iface.name, "tap2_kata");

        assert!(matches!(
            create_tap_network_endpoint(-3, ""),
            Err(MonovmError::InvalidEndpointIndex(-3))
        ));

        Ok(())
    }

    #[test]
    fn test_tap_cold_attach_unsupported() -> anyhow::Result<()> {
        let mut endpoint = create_tap_network_endpoint(0, "")?;
        let mut mock = MockHypervisor::new();

        assert!(matches!(
            endpoint.attach(&mut mock),
            Err(MonovmError::Unsupported(_))
        ));
        assert!(mock.cold_devices().is_empty());

        // A namespace the runtime did not create is left alone.
        endpoint.detach(false, "/run/netns/foreign")?;

        Ok(())
    }
}
