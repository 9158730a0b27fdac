use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    hypervisor::{
        Capabilities, DeviceOutcome, HypervisorConfig, MockHypervisor, ThreadIds, VmDevice,
        VmState,
    },
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The hypervisor backends the runtime knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorType {
    /// QEMU.
    Qemu,

    /// Firecracker.
    Firecracker,

    /// An in-process backend for tests.
    Mock,
}

/// A hypervisor backend driving one sandbox VM.
///
/// Calls are blocking. Devices added with [`Hypervisor::add_device`] become part of the boot
/// configuration, while the hotplug calls go through the backend's runtime management interface
/// and report what was actually granted.
///
/// Callers check [`Hypervisor::capabilities`] before requesting optional features. Asking for
/// an unsupported one is a caller bug.
pub trait Hypervisor: Send {
    /// Validates `config` and prepares the VM identified by `id`.
    fn create_sandbox(&mut self, id: &str, config: HypervisorConfig) -> MonovmResult<()>;

    /// Boots the VM, failing if it is not up within `timeout_secs`.
    fn start_sandbox(&mut self, timeout_secs: u32) -> MonovmResult<()>;

    /// Stops the VM.
    fn stop_sandbox(&mut self) -> MonovmResult<()>;

    /// Pauses the VM vCPUs.
    fn pause_sandbox(&mut self) -> MonovmResult<()>;

    /// Snapshots the paused VM to the template paths of its configuration.
    fn save_sandbox(&mut self) -> MonovmResult<()>;

    /// Resumes paused vCPUs.
    fn resume_sandbox(&mut self) -> MonovmResult<()>;

    /// Adds a device to the boot configuration.
    fn add_device(&mut self, device: VmDevice) -> MonovmResult<()>;

    /// Plugs a device into the running VM.
    fn hotplug_add_device(&mut self, device: VmDevice) -> MonovmResult<DeviceOutcome>;

    /// Unplugs a device from the running VM.
    fn hotplug_remove_device(&mut self, device: VmDevice) -> MonovmResult<DeviceOutcome>;

    /// Resizes VM memory to `mem_mib`, in steps of `block_size_mib`, returning the new size.
    fn resize_memory(&mut self, mem_mib: u32, block_size_mib: u32) -> MonovmResult<u32>;

    /// Resizes the vCPU count, returning the counts before and after.
    fn resize_vcpus(&mut self, vcpus: u32) -> MonovmResult<(u32, u32)>;

    /// Returns the console socket of the sandbox VM.
    fn get_sandbox_console(&self, sandbox_id: &str) -> MonovmResult<PathBuf>;

    /// Drops the connection to the backend's management interface.
    fn disconnect(&mut self);

    /// Returns what the backend supports.
    fn capabilities(&self) -> Capabilities;

    /// Returns the configuration the VM was created with.
    fn config(&self) -> &HypervisorConfig;

    /// Returns the host threads backing the vCPUs.
    fn get_thread_ids(&self) -> MonovmResult<ThreadIds>;

    /// Releases resources left behind by the VM.
    fn cleanup(&mut self) -> MonovmResult<()>;

    /// Returns the lifecycle state of the VM.
    fn state(&self) -> VmState;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns a backend of the given type.
///
/// Only the mock backend is built in. QEMU and Firecracker drivers live outside this crate and
/// implement [`Hypervisor`] themselves.
///
/// ## Errors
///
/// Returns `Unsupported` for backends that are not built in.
pub fn new_hypervisor(kind: HypervisorType) -> MonovmResult<Box<dyn Hypervisor>> {
    match kind {
        HypervisorType::Mock => Ok(Box::new(MockHypervisor::new())),
        other => Err(MonovmError::Unsupported(format!(
            "{other} hypervisor backend is not built in"
        ))),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for HypervisorType {
    type Err = MonovmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qemu" => Ok(HypervisorType::Qemu),
            "firecracker" => Ok(HypervisorType::Firecracker),
            "mock" => Ok(HypervisorType::Mock),
            _ => Err(MonovmError::UnknownHypervisorType(s.to_string())),
        }
    }
}

impl Display for HypervisorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HypervisorType::Qemu => "qemu",
            HypervisorType::Firecracker => "firecracker",
            HypervisorType::Mock => "mock",
        };

        write!(f, "{name}")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hypervisor_type_parse() -> anyhow::Result<()> {
        for (name, kind) in [
            ("qemu", HypervisorType::Qemu),
            ("firecracker", HypervisorType::Firecracker),
            ("mock", HypervisorType::Mock),
        ] {
            assert_eq!(name.parse::<HypervisorType>()?, kind);
            assert_eq!(kind.to_string(), name);
        }

        assert!(matches!(
            "xen".parse::<HypervisorType>(),
            Err(MonovmError::UnknownHypervisorType(_))
        ));

        Ok(())
    }

    #[test]
    fn test_new_hypervisor() {
        let hypervisor = new_hypervisor(HypervisorType::Mock);
        assert!(matches!(
            hypervisor.map(|h| h.state()),
            Ok(VmState::NotCreated)
        ));

        assert!(matches!(
            new_hypervisor(HypervisorType::Qemu),
            Err(MonovmError::Unsupported(_))
        ));
    }
}
