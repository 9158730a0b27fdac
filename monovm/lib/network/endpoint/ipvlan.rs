use serde::{Deserialize, Serialize};

use crate::{
    config::NetInterworkingModel,
    hypervisor::Hypervisor,
    network::{
        attach_pair, create_network_interface_pair, detach_pair, unsupported, Endpoint,
        EndpointType, NetworkInfo, NetworkInterfacePair,
    },
    MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An ipvlan interface.
///
/// ipvlan slaves share the MAC of their parent, so neither a bridge nor a macvtap can carry
/// their traffic. They are always wired with tc filters.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IPVlanEndpoint {
    net_pair: NetworkInterfacePair,
    properties: NetworkInfo,
    #[serde(default)]
    pci_addr: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the ipvlan endpoint at position `idx`.
///
/// ## Errors
///
/// Returns `InvalidEndpointIndex` if `idx` is negative.
pub fn create_ipvlan_network_endpoint(idx: i32, if_name: &str) -> MonovmResult<IPVlanEndpoint> {
    Ok(IPVlanEndpoint {
        net_pair: create_network_interface_pair(idx, if_name, NetInterworkingModel::TcFilter)?,
        ..Default::default()
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Endpoint for IPVlanEndpoint {
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
        EndpointType::IPVlan
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
        attach_pair(&name, EndpointType::IPVlan, &mut self.net_pair, hypervisor)
    }

    fn detach(&mut self, netns_created: bool, netns_path: &str) -> MonovmResult<()> {
        detach_pair(
            EndpointType::IPVlan,
            &mut self.net_pair,
            netns_created,
            netns_path,
        )
    }

    fn hot_attach(&mut self, _hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        Err(unsupported(EndpointType::IPVlan, "hot attach"))
    }

    fn hot_detach(
        &mut self,
        _hypervisor: &mut dyn Hypervisor,
        _netns_created: bool,
        _netns_path: &str,
    ) -> MonovmResult<()> {
        Err(unsupported(EndpointType::IPVlan, "hot detach"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::MonovmError;

    use super::*;

    #[test]
    fn test_ipvlan_endpoint_forces_tc_filtering() -> anyhow::Result<()> {
        let endpoint = create_ipvlan_network_endpoint(5, "")?;

        assert_eq!(endpoint.endpoint_type(), EndpointType::IPVlan);
        assert_eq!(endpoint.name(), "eth5");
        assert_eq!(
            endpoint.network_pair().map(|p| p.interworking_model),
            Some(NetInterworkingModel::TcFilter)
        );

        assert!(matches!(
            create_ipvlan_network_endpoint(-1, "eth0"),
            Err(MonovmError::InvalidEndpointIndex(-1))
        ));

        Ok(())
    }
}
