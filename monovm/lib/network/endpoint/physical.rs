use serde::{Deserialize, Serialize};

use crate::{
    hypervisor::{Hypervisor, VfioDevice, VmDevice},
    network::{unsupported, Endpoint, EndpointType, HostProbe, NetworkInfo, NetworkInterfacePair, PciInfo},
    MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A PCI NIC handed to the VM through VFIO.
///
/// Attaching takes the device away from its host driver. Detaching gives it back, whether or
/// not the runtime created the namespace.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalEndpoint {
    iface_name: String,
    hard_addr: String,
    properties: NetworkInfo,
    bdf: String,
    driver: String,
    vendor_device_id: String,
    #[serde(default)]
    pci_addr: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PhysicalEndpoint {
    /// Returns the PCI address of the NIC on the host.
    pub fn bdf(&self) -> &str {
        &self.bdf
    }

    /// Returns the host driver the NIC was bound to when scanned.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Returns `<vendor> <device>` of the NIC.
    pub fn vendor_device_id(&self) -> &str {
        &self.vendor_device_id
    }

    /// Passes the NIC through to the VM, binding it with `probe`.
    pub fn attach_with(
        &mut self,
        probe: &HostProbe,
        hypervisor: &mut dyn Hypervisor,
    ) -> MonovmResult<()> {
        probe.bind_to_vfio(&self.pci_info())?;

        hypervisor.add_device(VmDevice::Vfio(VfioDevice {
            bdf: self.bdf.clone(),
            name: self.iface_name.clone(),
        }))
    }

    /// Rebinds the NIC to its host driver with `probe`.
    pub fn detach_with(&mut self, probe: &HostProbe) -> MonovmResult<()> {
        probe.bind_to_host(&self.pci_info())
    }

    fn pci_info(&self) -> PciInfo {
        PciInfo {
            bdf: self.bdf.clone(),
            driver: self.driver.clone(),
            vendor_device_id: self.vendor_device_id.clone(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates a physical endpoint, reading the PCI identity of the NIC through `probe`.
///
/// ## Errors
///
/// Returns an `Io` error if the interface is not backed by a PCI device.
pub fn create_physical_endpoint(
    net_info: NetworkInfo,
    probe: &HostProbe,
) -> MonovmResult<PhysicalEndpoint> {
    let pci = probe.pci_info(&net_info.iface.name)?;

    Ok(PhysicalEndpoint {
        iface_name: net_info.iface.name.clone(),
        hard_addr: net_info.iface.hardware_addr.clone(),
        properties: net_info,
        bdf: pci.bdf,
        driver: pci.driver,
        vendor_device_id: pci.vendor_device_id,
        pci_addr: String::new(),
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Endpoint for PhysicalEndpoint {
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
        EndpointType::Physical
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
        self.attach_with(&HostProbe::default(), hypervisor)
    }

    fn detach(&mut self, _netns_created: bool, _netns_path: &str) -> MonovmResult<()> {
        // The driver lives outside any namespace.
        self.detach_with(&HostProbe::default())
    }

    fn hot_attach(&mut self, _hypervisor: &mut dyn Hypervisor) -> MonovmResult<()> {
        Err(unsupported(EndpointType::Physical, "hot attach"))
    }

    fn hot_detach(
        &mut self,
        _hypervisor: &mut dyn Hypervisor,
        _netns_created: bool,
        _netns_path: &str,
    ) -> MonovmResult<()> {
        Err(unsupported(EndpointType::Physical, "hot detach"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
