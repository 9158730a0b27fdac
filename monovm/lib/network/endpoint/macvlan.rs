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

/// A macvlan interface in bridge mode.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgedMacvlanEndpoint {
    net_pair: NetworkInterfacePair,
    properties: NetworkInfo,
    #[serde(default)]
    pci_addr: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the macvlan endpoint at position `idx`, wired with `model`.
///
/// ## Errors
///
/// Returns `InvalidEndpointIndex` if `idx` is negative.
pub fn create_bridged_macvlan_network_endpoint(
    idx: i32,
    if_name: &str,
    model: NetInterworkingModel,
) -> MonovmResult<BridgedMacvlanEndpoint> {
    Ok(BridgedMacvlanEndpoint {
        net_pair: create_network_interface_pair(idx, if_name, model)?,
        ..Default::default()
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Endpoint for BridgedMacvlanEndpoint {
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
        EndpointType::BridgedMacvlan
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
        attach_pair(
            &name,
            EndpointType::BridgedMacvlan,
            &mut self.net_pair,
            hypervisor,
        )
    }

    fn detach(&mut self, netns_created: bool, netns_path: &str) -> MonovmResult<()> {
        detach_pair(
            EndpointType::BridgedMacvlan,
            &mut self.net_pair,
            netns_created,
            netns_path,
        )
    }

    fn hot_attach(&mut self, _hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        Err(unsupported(EndpointType::BridgedMacvlan, "hot attach"))
    }

    fn hot_detach(
        &mut self,
        _hypervisor: &mut dyn Hypervisor,
        _netns_created: bool,
        _netns_path: &str,
    ) -> MonovmResult<()> {
        Err(unsupported(EndpointType::BridgedMacvlan, "hot detach"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{hypervisor::MockHypervisor, MonovmError};

    use super::*;

    #[test]
    fn test_create_bridged_macvlan_endpoint() -> anyhow::Result<()> {
        let endpoint =
            create_bridged_macvlan_network_endpoint(1, "", NetInterworkingModel::Bridged)?;

        assert_eq!(endpoint.endpoint_type(), EndpointType::BridgedMacvlan);
        assert_eq!(endpoint.name(), "eth1");
        assert_eq!(
            endpoint.network_pair().map(|p| p.tap_interface.name.as_str()),
            Some("br1_kata")
        );

        assert!(matches!(
            create_bridged_macvlan_network_endpoint(-2, "", NetInterworkingModel::Bridged),
            Err(MonovmError::InvalidEndpointIndex(-2))
        ));

        Ok(())
    }

    #[test]
    fn test_bridged_macvlan_hotplug_unsupported() -> anyhow::Result<()> {
        let mut endpoint =
            create_bridged_macvlan_network_endpoint(0, "", NetInterworkingModel::Bridged)?;
        let mut mock = MockHypervisor::new();

        assert!(matches!(
            endpoint.hot_attach(&mut mock),
            Err(MonovmError::Unsupported(_))
        ));
        assert!(matches!(
            endpoint.hot_detach(&mut mock, true, ""),
            Err(MonovmError::Unsupported(_))
        ));

        Ok(())
    }
}
