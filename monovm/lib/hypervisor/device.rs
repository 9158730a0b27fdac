use std::{
    fmt::{self, Display},
    fs::File,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::{config::NetInterworkingModel, network::EndpointType};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of a virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// A guest image.
    Image,

    /// A shared filesystem.
    Fs,

    /// A network interface.
    Network,

    /// A serial device.
    Serial,

    /// A block device.
    Block,

    /// A console.
    Console,

    /// A serial port.
    SerialPort,

    /// A vhost vsock PCI device.
    VsockPci,

    /// A VFIO passthrough device.
    Vfio,

    /// A vhost-user device.
    VhostUser,

    /// A vCPU.
    Cpu,

    /// A memory slot.
    Memory,
}

/// A device handed to a hypervisor, at boot or through hotplug.
#[derive(Debug)]
pub enum VmDevice {
    /// A virtio-net interface backed by a TAP or macvtap device.
    Network(NetworkDevice),

    /// A virtio-net interface served by a vhost-user backend.
    VhostUserNet(VhostUserNetDevice),

    /// A host PCI device passed through with VFIO.
    Vfio(VfioDevice),

    /// A block device.
    Block(BlockDevice),

    /// A number of vCPUs.
    Cpu(u32),

    /// A memory slot.
    Memory(MemoryDevice),
}

/// A network interface wired on the host side.
///
/// The file descriptors are owned by the device. Handing the device to the hypervisor hands
/// the descriptors over with it.
#[derive(Debug, Default)]
pub struct NetworkDevice {
    /// The identifier of the interface pair, or the interface name when there is none.
    pub id: String,

    /// The guest-visible interface name.
    pub name: String,

    /// The guest-visible MAC address.
    pub mac_address: String,

    /// The host device the VM is plugged into.
    pub host_device: String,

    /// The endpoint kind that produced the device.
    pub endpoint_type: Option<EndpointType>,

    /// The interworking model the host side was wired with.
    pub interworking_model: NetInterworkingModel,

    /// TAP or macvtap queue descriptors.
    pub vm_fds: Vec<File>,

    /// vhost-net descriptors, one per queue.
    pub vhost_fds: Vec<File>,
}

/// A vhost-user network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostUserNetDevice {
    /// The device identifier.
    pub id: String,

    /// The vhost-user socket.
    pub socket_path: PathBuf,

    /// The guest-visible MAC address.
    pub mac_address: String,
}

/// A host PCI device handed to the guest through VFIO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfioDevice {
    /// The PCI address of the device, `dddd:bb:dd.f`.
    pub bdf: String,

    /// The interface name the device had on the host.
    pub name: String,
}

/// A block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    /// The device identifier.
    pub id: String,

    /// The backing file or device on the host.
    pub path: PathBuf,
}

/// A memory slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryDevice {
    /// The slot number.
    pub slot: u32,

    /// The slot size in MiB.
    pub size_mib: u32,

    /// The guest physical address of the slot.
    pub addr: u64,

    /// Whether the guest needs to be told to probe the slot.
    pub probe: bool,
}

/// What a hotplug request yielded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// The request has no quantity to report.
    Done,

    /// The vCPU count granted or removed.
    Vcpus(u32),

    /// The memory in MiB granted or removed.
    MemoryMib(u32),
}

/// The host thread ids backing the VM vCPUs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadIds {
    /// One thread id per vCPU.
    pub vcpus: Vec<i32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VmDevice {
    /// Returns the kind of the device.
    pub fn device_type(&self) -> DeviceType {
        match self {
            VmDevice::Network(_) => DeviceType::Network,
            VmDevice::VhostUserNet(_) => DeviceType::VhostUser,
            VmDevice::Vfio(_) => DeviceType::Vfio,
            VmDevice::Block(_) => DeviceType::Block,
            VmDevice::Cpu(_) => DeviceType::Cpu,
            VmDevice::Memory(_) => DeviceType::Memory,
        }
    }

    /// Returns a short identifier for logs and bookkeeping.
    pub fn id(&self) -> String {
        match self {
            VmDevice::Network(d) => d.id.clone(),
            VmDevice::VhostUserNet(d) => d.id.clone(),
            VmDevice::Vfio(d) => d.bdf.clone(),
            VmDevice::Block(d) => d.id.clone(),
            VmDevice::Cpu(n) => format!("cpu-{n}"),
            VmDevice::Memory(m) => format!("mem-slot-{}", m.slot),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Image => "image",
            DeviceType::Fs => "fs",
            DeviceType::Network => "network",
            DeviceType::Serial => "serial",
            DeviceType::Block => "block",
            DeviceType::Console => "console",
            DeviceType::SerialPort => "serial-port",
            DeviceType::VsockPci => "vsock-pci",
            DeviceType::Vfio => "vfio",
            DeviceType::VhostUser => "vhost-user",
            DeviceType::Cpu => "cpu",
            DeviceType::Memory => "memory",
        };

        write!(f, "{name}")
    }
}
