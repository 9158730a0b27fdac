use std::path::PathBuf;

use crate::{
    hypervisor::{
        Capabilities, DeviceOutcome, Hypervisor, HypervisorConfig, ThreadIds, VmDevice,
        VmOperation, VmState,
    },
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-process hypervisor that records what it is asked to do.
///
/// It validates its configuration, enforces the VM state machine and keeps every device it is
/// handed, which makes it suitable for exercising endpoint and sandbox logic without a VM.
#[derive(Debug)]
pub struct MockHypervisor {
    id: String,
    config: HypervisorConfig,
    capabilities: Capabilities,
    state: VmState,
    vcpus: u32,
    memory_mib: u32,
    cold_devices: Vec<VmDevice>,
    hot_devices: Vec<VmDevice>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MockHypervisor {
    /// Creates a mock supporting block devices, block hotplug and multi-queue networking.
    pub fn new() -> Self {
        Self::with_capabilities(
            Capabilities::new()
                .with_block_device_support()
                .with_block_device_hotplug_support()
                .with_multi_queue_support(),
        )
    }

    /// Creates a mock reporting the given capabilities.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            id: String::new(),
            config: HypervisorConfig::default(),
            capabilities,
            state: VmState::NotCreated,
            vcpus: 0,
            memory_mib: 0,
            cold_devices: Vec::new(),
            hot_devices: Vec::new(),
        }
    }

    /// Returns the sandbox id the VM was created for.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the devices in the boot configuration.
    pub fn cold_devices(&self) -> &[VmDevice] {
        &self.cold_devices
    }

    /// Returns the devices currently hotplugged.
    pub fn hot_devices(&self) -> &[VmDevice] {
        &self.hot_devices
    }

    /// Returns the current vCPU count.
    pub fn vcpus(&self) -> u32 {
        self.vcpus
    }

    /// Returns the current memory size in MiB.
    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    fn apply(&mut self, operation: VmOperation) -> MonovmResult<()> {
        self.state = self.state.transition(operation)?;
        tracing::debug!(id = %self.id, %operation, state = %self.state, "mock vm transition");
        Ok(())
    }

    fn grow_vcpus(&self, n: u32) -> MonovmResult<u32> {
        let limit = *self.config.get_default_max_vcpus();
        match self.vcpus.checked_add(n) {
            Some(total) if total <= limit => Ok(total),
            _ => Err(MonovmError::ResourceLimitExceeded {
                resource: "vcpus".to_string(),
                requested: u64::from(self.vcpus) + u64::from(n),
                limit: u64::from(limit),
            }),
        }
    }

    fn grow_memory(&self, size_mib: u32) -> MonovmResult<u32> {
        self.memory_mib
            .checked_add(size_mib)
            .ok_or_else(|| MonovmError::ResourceLimitExceeded {
                resource: "memory".to_string(),
                requested: u64::from(self.memory_mib) + u64::from(size_mib),
                limit: u64::from(u32::MAX),
            })
    }

    fn ensure_running(&self, operation: &str) -> MonovmResult<()> {
        if !self.state.is_running() {
            return Err(MonovmError::InvalidStateTransition {
                operation: operation.to_string(),
                state: self.state.to_string(),
            });
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Hypervisor for MockHypervisor {
    fn create_sandbox(&mut self, id: &str, mut config: HypervisorConfig) -> MonovmResult<()> {
        config.valid()?;

        self.apply(VmOperation::Create {
            from_template: *config.get_boot_from_template(),
        })?;

        self.id = id.to_string();
        self.vcpus = *config.get_num_vcpus();
        self.memory_mib = *config.get_memory_mib();
        self.config = config;

        Ok(())
    }

    fn start_sandbox(&mut self, _timeout_secs: u32) -> MonovmResult<()> {
        self.apply(VmOperation::Start)
    }

    fn stop_sandbox(&mut self) -> MonovmResult<()> {
        self.apply(VmOperation::Stop)
    }

    fn pause_sandbox(&mut self) -> MonovmResult<()> {
        self.apply(VmOperation::Pause)
    }

    fn save_sandbox(&mut self) -> MonovmResult<()> {
        self.apply(VmOperation::Save)
    }

    fn resume_sandbox(&mut self) -> MonovmResult<()> {
        self.apply(VmOperation::Resume)
    }

    fn add_device(&mut self, device: VmDevice) -> MonovmResult<()> {
        if self.state.is_running() {
            return Err(MonovmError::InvalidStateTransition {
                operation: "add boot device to".to_string(),
                state: self.state.to_string(),
            });
        }

        tracing::debug!(id = %device.id(), kind = %device.device_type(), "mock add device");
        self.cold_devices.push(device);
        Ok(())
    }

    fn hotplug_add_device(&mut self, device: VmDevice) -> MonovmResult<DeviceOutcome> {
        self.ensure_running("hotplug a device into")?;

        let outcome = match &device {
            VmDevice::Cpu(n) => {
                self.vcpus = self.grow_vcpus(*n)?;
                DeviceOutcome::Vcpus(*n)
            }
            VmDevice::Memory(m) => {
                self.memory_mib = self.grow_memory(m.size_mib)?;
                DeviceOutcome::MemoryMib(m.size_mib)
            }
            _ => DeviceOutcome::Done,
        };

        tracing::debug!(id = %device.id(), kind = %device.device_type(), "mock hotplug add");
        self.hot_devices.push(device);

        Ok(outcome)
    }

    fn hotplug_remove_device(&mut self, device: VmDevice) -> MonovmResult<DeviceOutcome> {
        self.ensure_running("hot unplug a device from")?;

        let outcome = match &device {
            VmDevice::Cpu(n) => {
                self.vcpus = self.vcpus.saturating_sub(*n);
                DeviceOutcome::Vcpus(*n)
            }
            VmDevice::Memory(m) => {
                self.memory_mib = self.memory_mib.saturating_sub(m.size_mib);
                DeviceOutcome::MemoryMib(m.size_mib)
            }
            _ => DeviceOutcome::Done,
        };

        let (kind, id) = (device.device_type(), device.id());
        self.hot_devices
            .retain(|d| !(d.device_type() == kind && d.id() == id));

        tracing::debug!(%id, %kind, "mock hotplug remove");
        Ok(outcome)
    }

    fn resize_memory(&mut self, mem_mib: u32, block_size_mib: u32) -> MonovmResult<u32> {
        self.ensure_running("resize memory of")?;

        let granted = match block_size_mib {
            0 => Some(mem_mib),
            block => mem_mib.div_ceil(block).checked_mul(block),
        }
        .ok_or_else(|| MonovmError::ResourceLimitExceeded {
            resource: "memory".to_string(),
            requested: u64::from(mem_mib),
            limit: u64::from(u32::MAX),
        })?;

        self.memory_mib = granted;
        Ok(granted)
    }

    fn resize_vcpus(&mut self, vcpus: u32) -> MonovmResult<(u32, u32)> {
        self.ensure_running("resize vCPUs of")?;

        let old = self.vcpus;
        self.vcpus = vcpus.min(*self.config.get_default_max_vcpus());
        Ok((old, self.vcpus))
    }

    fn get_sandbox_console(&self, _sandbox_id: &str) -> MonovmResult<PathBuf> {
        Ok(PathBuf::new())
    }

    fn disconnect(&mut self) {}

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn config(&self) -> &HypervisorConfig {
        &self.config
    }

    fn get_thread_ids(&self) -> MonovmResult<ThreadIds> {
        Ok(ThreadIds {
            vcpus: vec![std::process::id() as i32],
        })
    }

    fn cleanup(&mut self) -> MonovmResult<()> {
        self.hot_devices.clear();
        self.cold_devices.clear();
        Ok(())
    }

    fn state(&self) -> VmState {
        self.state
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::hypervisor::{BlockDevice, MemoryDevice};

    use super::*;

    fn valid_config() -> HypervisorConfig {
        HypervisorConfig::builder()
            .kernel_path("/opt/vm/vmlinuz")
            .image_path("/opt/vm/rootfs.img")
            .num_vcpus(2)
            .build()
    }

    #[test_log::test]
    fn test_mock_create_validates_config() {
        let mut mock = MockHypervisor::new();

        let result = mock.create_sandbox("sandbox", HypervisorConfig::default());
        assert!(matches!(result, Err(MonovmError::InvalidHypervisorConfig(_))));
        assert_eq!(mock.state(), VmState::NotCreated);
    }

    #[test_log::test]
    fn test_mock_lifecycle_and_devices() -> anyhow::Result<()> {
        let mut mock = MockHypervisor::new();
        mock.create_sandbox("sandbox", valid_config())?;
        assert_eq!(mock.id(), "sandbox");
        assert_eq!(*mock.config().get_memory_mib(), 2048);

        mock.add_device(VmDevice::Block(BlockDevice {
            id: "drive-0".to_string(),
            path: PathBuf::from("/dev/loop0"),
        }))?;
        assert_eq!(mock.cold_devices().len(), 1);

        // Hotplug needs a running VM.
        assert!(mock.hotplug_add_device(VmDevice::Cpu(1)).is_err());

        mock.start_sandbox(10)?;
        assert!(mock.add_device(VmDevice::Cpu(1)).is_err());

        assert_eq!(
            mock.hotplug_add_device(VmDevice::Cpu(2))?,
            DeviceOutcome::Vcpus(2)
        );
        assert_eq!(mock.vcpus(), 4);

        let memory = MemoryDevice {
            slot: 1,
            size_mib: 512,
            ..Default::default()
        };
        assert_eq!(
            mock.hotplug_add_device(VmDevice::Memory(memory))?,
            DeviceOutcome::MemoryMib(512)
        );
        assert_eq!(mock.hot_devices().len(), 2);

        assert_eq!(mock.memory_mib(), 2560);

        assert_eq!(
            mock.hotplug_remove_device(VmDevice::Memory(memory))?,
            DeviceOutcome::MemoryMib(512)
        );
        assert_eq!(mock.memory_mib(), 2048);
        assert_eq!(mock.hot_devices().len(), 1);

        mock.pause_sandbox()?;
        mock.save_sandbox()?;
        mock.resume_sandbox()?;
        mock.stop_sandbox()?;
        assert_eq!(mock.state(), VmState::Stopped);

        mock.cleanup()?;
        assert!(mock.cold_devices().is_empty());

        Ok(())
    }

    #[test_log::test]
    fn test_mock_resize() -> anyhow::Result<()> {
        let mut mock = MockHypervisor::new();
        mock.create_sandbox("sandbox", valid_config())?;
        mock.start_sandbox(10)?;

        assert_eq!(mock.resize_memory(3000, 128)?, 3072);
        assert_eq!(mock.resize_memory(1024, 0)?, 1024);

        assert_eq!(mock.resize_vcpus(8)?, (2, 8));
        assert_eq!(mock.resize_vcpus(1000)?, (8, 240));

        // Rounding up past the u32 range is refused and keeps the previous size.
        assert!(matches!(
            mock.resize_memory(u32::MAX - 1, 1024),
            Err(MonovmError::ResourceLimitExceeded { .. })
        ));
        assert_eq!(mock.memory_mib(), 1024);

        let threads = mock.get_thread_ids()?;
        assert_eq!(threads.vcpus, vec![std::process::id() as i32]);

        Ok(())
    }

    #[test_log::test]
    fn test_mock_hotplug_limits() -> anyhow::Result<()> {
        let mut mock = MockHypervisor::new();
        mock.create_sandbox("sandbox", valid_config())?;
        mock.start_sandbox(10)?;

        let max = *mock.config().get_default_max_vcpus();
        assert!(matches!(
            mock.hotplug_add_device(VmDevice::Cpu(u32::MAX)),
            Err(MonovmError::ResourceLimitExceeded { .. })
        ));
        assert!(matches!(
            mock.hotplug_add_device(VmDevice::Cpu(max)),
            Err(MonovmError::ResourceLimitExceeded { .. })
        ));
        assert_eq!(mock.vcpus(), 2);

        let huge = MemoryDevice {
            slot: 1,
            size_mib: u32::MAX,
            ..Default::default()
        };
        assert!(matches!(
            mock.hotplug_add_device(VmDevice::Memory(huge)),
            Err(MonovmError::ResourceLimitExceeded { .. })
        ));
        assert_eq!(mock.memory_mib(), 2048);

        // Failed requests are not recorded.
        assert!(mock.hot_devices().is_empty());

        Ok(())
    }
}
