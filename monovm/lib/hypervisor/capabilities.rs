//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const BLOCK_DEVICE_SUPPORT: u32 = 1 << 0;
const BLOCK_DEVICE_HOTPLUG_SUPPORT: u32 = 1 << 1;
const HOTPLUG_UNSUPPORTED: u32 = 1 << 2;
const PLAN9_FS_UNSUPPORTED: u32 = 1 << 3;
const MULTI_QUEUE_SUPPORT: u32 = 1 << 4;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Features a hypervisor backend supports.
///
/// Capabilities are assembled once when a backend is constructed and only read afterwards.
/// Callers check them before picking a device strategy.
///
/// ## Examples
///
/// ```
/// use monovm::hypervisor::Capabilities;
///
/// let caps = Capabilities::new()
///     .with_block_device_support()
///     .with_multi_queue_support();
///
/// assert!(caps.is_block_device_supported());
/// assert!(!caps.is_block_device_hotplug_supported());
/// assert!(caps.is_hotplug_supported());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    flags: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Capabilities {
    /// Creates an empty capability set: no block devices, hotplug and 9p supported.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks block devices as supported.
    pub fn with_block_device_support(self) -> Self {
        self.with(BLOCK_DEVICE_SUPPORT)
    }

    /// Marks block device hotplug as supported.
    pub fn with_block_device_hotplug_support(self) -> Self {
        self.with(BLOCK_DEVICE_HOTPLUG_SUPPORT)
    }

    /// Marks hotplug as unsupported altogether.
    pub fn with_hotplug_unsupported(self) -> Self {
        self.with(HOTPLUG_UNSUPPORTED)
    }

    /// Marks 9p filesystem sharing as unsupported.
    pub fn with_9p_unsupported(self) -> Self {
        self.with(PLAN9_FS_UNSUPPORTED)
    }

    /// Marks multi-queue network devices as supported.
    pub fn with_multi_queue_support(self) -> Self {
        self.with(MULTI_QUEUE_SUPPORT)
    }

    /// Whether block devices can be used.
    pub fn is_block_device_supported(&self) -> bool {
        self.has(BLOCK_DEVICE_SUPPORT)
    }

    /// Whether block devices can be hotplugged.
    pub fn is_block_device_hotplug_supported(&self) -> bool {
        self.has(BLOCK_DEVICE_HOTPLUG_SUPPORT)
    }

    /// Whether any device can be hotplugged.
    pub fn is_hotplug_supported(&self) -> bool {
        !self.has(HOTPLUG_UNSUPPORTED)
    }

    /// Whether 9p filesystem sharing is available.
    pub fn is_9p_supported(&self) -> bool {
        !self.has(PLAN9_FS_UNSUPPORTED)
    }

    /// Whether network devices can use more than one queue.
    pub fn is_multi_queue_supported(&self) -> bool {
        self.has(MULTI_QUEUE_SUPPORT)
    }

    fn with(self, flag: u32) -> Self {
        Self {
            flags: self.flags | flag,
        }
    }

    fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_default() {
        let caps = Capabilities::new();

        assert!(!caps.is_block_device_supported());
        assert!(!caps.is_block_device_hotplug_supported());
        assert!(caps.is_hotplug_supported());
        assert!(caps.is_9p_supported());
        assert!(!caps.is_multi_queue_supported());
    }

    #[test]
    fn test_capabilities_flags_are_independent() {
        let caps = Capabilities::new()
            .with_block_device_hotplug_support()
            .with_hotplug_unsupported()
            .with_9p_unsupported();

        assert!(!caps.is_block_device_supported());
        assert!(caps.is_block_device_hotplug_supported());
        assert!(!caps.is_hotplug_supported());
        assert!(!caps.is_9p_supported());
        assert!(!caps.is_multi_queue_supported());
    }
}
