use std::{collections::HashMap, path::PathBuf};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    config::{
        DEFAULT_BLOCK_DRIVER, DEFAULT_BRIDGES, DEFAULT_MAX_VCPUS, DEFAULT_MEMORY_MIB,
        DEFAULT_MSIZE_9P, DEFAULT_VCPUS,
    },
    hypervisor::{Asset, AssetType, Param},
    InvalidHypervisorConfigError, MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The configuration a hypervisor backend boots a sandbox VM with.
///
/// Zero and empty values are placeholders that [`HypervisorConfig::valid`] replaces with defaults.
///
/// ## Examples
///
/// ```
/// use monovm::hypervisor::HypervisorConfig;
///
/// let mut config = HypervisorConfig::builder()
///     .kernel_path("/usr/share/kata/vmlinuz")
///     .image_path("/usr/share/kata/rootfs.img")
///     .build();
///
/// config.valid()?;
/// assert_eq!(*config.get_num_vcpus(), 1);
/// assert_eq!(*config.get_memory_mib(), 2048);
/// # Ok::<(), monovm::MonovmError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters, TypedBuilder, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
pub struct HypervisorConfig {
    /// The number of vCPUs the VM boots with.
    #[builder(default)]
    num_vcpus: u32,

    /// The ceiling for vCPU hotplug.
    #[builder(default)]
    default_max_vcpus: u32,

    /// The memory size in MiB the VM boots with.
    #[builder(default)]
    memory_mib: u32,

    /// The number of PCI bridges available for hotplug.
    #[builder(default)]
    default_bridges: u32,

    /// The msize used for 9p shares.
    #[builder(default)]
    msize_9p: u32,

    /// The number of memory hotplug slots.
    #[builder(default)]
    mem_slots: u32,

    /// Memory space reserved for nvdimm devices.
    #[builder(default)]
    mem_offset: u32,

    /// Extra guest kernel parameters.
    #[builder(default)]
    kernel_params: Vec<Param>,

    /// Extra hypervisor parameters.
    #[builder(default)]
    hypervisor_params: Vec<Param>,

    /// The guest kernel.
    #[builder(default, setter(into))]
    kernel_path: PathBuf,

    /// The guest image. Exclusive with `initrd_path`.
    #[builder(default, setter(into))]
    image_path: PathBuf,

    /// The guest initrd. Exclusive with `image_path`.
    #[builder(default, setter(into))]
    initrd_path: PathBuf,

    /// The guest firmware.
    #[builder(default, setter(into))]
    firmware_path: PathBuf,

    /// Machine specific accelerators.
    #[builder(default, setter(into))]
    machine_accelerators: String,

    /// The hypervisor binary.
    #[builder(default, setter(into))]
    hypervisor_path: PathBuf,

    /// The block device driver.
    #[builder(default, setter(into))]
    block_device_driver: String,

    /// The emulated machine type.
    #[builder(default, setter(into))]
    machine_type: String,

    /// Where VM memory is stored when booting to or from a template.
    #[builder(default, setter(into))]
    memory_path: PathBuf,

    /// Where VM device state is stored when booting to or from a template.
    #[builder(default, setter(into))]
    devices_state_path: PathBuf,

    /// The host source of entropy.
    #[builder(default, setter(into))]
    entropy_source: PathBuf,

    /// Boot artifacts taking precedence over the configured paths.
    #[builder(default)]
    #[serde(default)]
    custom_assets: HashMap<AssetType, Asset>,

    /// Whether cache options are set on block devices.
    #[builder(default)]
    block_device_cache_set: bool,

    /// Whether block devices bypass the host page cache.
    #[builder(default)]
    block_device_cache_direct: bool,

    /// Whether flush requests to block devices are ignored.
    #[builder(default)]
    block_device_cache_noflush: bool,

    /// Disallows block devices.
    #[builder(default)]
    disable_block_device_use: bool,

    /// Processes IO in a separate thread.
    #[builder(default)]
    enable_io_threads: bool,

    /// Enables debug output where available.
    #[builder(default)]
    debug: bool,

    /// Preallocates VM memory.
    #[builder(default)]
    mem_prealloc: bool,

    /// Backs VM memory with huge pages.
    #[builder(default)]
    huge_pages: bool,

    /// Enables realtime scheduling.
    #[builder(default)]
    realtime: bool,

    /// Locks VM memory when realtime is enabled.
    #[builder(default)]
    mlock: bool,

    /// Skips tweaks applied when running nested.
    #[builder(default)]
    disable_nesting_checks: bool,

    /// Uses vsock for agent communication.
    #[builder(default)]
    use_vsock: bool,

    /// Hotplugs VFIO devices on the root bus.
    #[builder(default)]
    hotplug_vfio_on_root_bus: bool,

    /// Boots the VM so that it can serve as a template.
    #[builder(default)]
    boot_to_be_template: bool,

    /// Boots the VM from a template.
    #[builder(default)]
    boot_from_template: bool,

    /// Disables vhost-net acceleration for network devices.
    #[builder(default)]
    disable_vhost_net: bool,

    /// The in-guest directory of drop-in hooks.
    #[builder(default, setter(into))]
    guest_hook_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HypervisorConfig {
    /// Validates the configuration and fills unset values with defaults.
    ///
    /// Calling it again on a validated configuration changes nothing.
    ///
    /// ## Errors
    ///
    /// Fails when the kernel path is empty, when both image and initrd paths are empty, when
    /// booting both to and from a template, when a template mode has no memory path, or when
    /// booting from a template has no device state path.
    pub fn valid(&mut self) -> MonovmResult<()> {
        if self.kernel_path.as_os_str().is_empty() {
            return Err(InvalidHypervisorConfigError::MissingKernelPath.into());
        }

        if self.image_path.as_os_str().is_empty() && self.initrd_path.as_os_str().is_empty() {
            return Err(InvalidHypervisorConfigError::MissingImageAndInitrd.into());
        }

        self.check_template_config()?;

        if self.num_vcpus == 0 {
            self.num_vcpus = DEFAULT_VCPUS;
        }

        if self.default_max_vcpus == 0 {
            self.default_max_vcpus = DEFAULT_MAX_VCPUS;
        }

        if self.memory_mib == 0 {
            self.memory_mib = DEFAULT_MEMORY_MIB;
        }

        if self.default_bridges == 0 {
            self.default_bridges = DEFAULT_BRIDGES;
        }

        if self.block_device_driver.is_empty() {
            self.block_device_driver = DEFAULT_BLOCK_DRIVER.to_string();
        }

        if self.msize_9p == 0 {
            self.msize_9p = DEFAULT_MSIZE_9P;
        }

        Ok(())
    }

    fn check_template_config(&self) -> MonovmResult<()> {
        if self.boot_to_be_template && self.boot_from_template {
            return Err(InvalidHypervisorConfigError::ConflictingTemplateModes.into());
        }

        if self.boot_to_be_template || self.boot_from_template {
            if self.memory_path.as_os_str().is_empty() {
                return Err(InvalidHypervisorConfigError::MissingTemplateMemoryPath.into());
            }

            if self.boot_from_template && self.devices_state_path.as_os_str().is_empty() {
                return Err(InvalidHypervisorConfigError::MissingTemplateDevicesStatePath.into());
            }
        }

        Ok(())
    }

    /// Appends a guest kernel parameter.
    ///
    /// ## Errors
    ///
    /// Returns `EmptyKernelParamKey` if the parameter has no key.
    pub fn add_kernel_param(&mut self, param: Param) -> MonovmResult<()> {
        if param.key.is_empty() {
            return Err(MonovmError::EmptyKernelParamKey);
        }

        self.kernel_params.push(param);
        Ok(())
    }

    /// Registers a custom asset. An asset with an empty path is ignored so the configured one
    /// stays in use.
    ///
    /// ## Errors
    ///
    /// Returns `InvalidAsset` if the asset path is not absolute.
    pub fn add_custom_asset(&mut self, asset: Asset) -> MonovmResult<()> {
        if asset.path().as_os_str().is_empty() {
            return Ok(());
        }

        if !asset.valid() {
            return Err(MonovmError::InvalidAsset {
                kind: asset.kind().to_string(),
                path: asset.path().display().to_string(),
            });
        }

        tracing::debug!(kind = %asset.kind(), path = %asset.path().display(), "using custom asset");
        self.custom_assets.insert(asset.kind(), asset);

        Ok(())
    }

    /// Returns the path of an asset, preferring a custom one over the configured path.
    pub fn asset_path(&self, kind: AssetType) -> PathBuf {
        if let Some(asset) = self.custom_assets.get(&kind) {
            return asset.path().to_path_buf();
        }

        match kind {
            AssetType::Kernel => self.kernel_path.clone(),
            AssetType::Image => self.image_path.clone(),
            AssetType::Initrd => self.initrd_path.clone(),
            AssetType::Hypervisor => self.hypervisor_path.clone(),
            AssetType::Firmware => self.firmware_path.clone(),
        }
    }

    /// Whether a custom asset overrides the configured path of `kind`.
    pub fn is_custom_asset(&self, kind: AssetType) -> bool {
        self.custom_assets.contains_key(&kind)
    }

    /// Returns the guest kernel path.
    pub fn kernel_asset_path(&self) -> PathBuf {
        self.asset_path(AssetType::Kernel)
    }

    /// Returns the guest image path.
    pub fn image_asset_path(&self) -> PathBuf {
        self.asset_path(AssetType::Image)
    }

    /// Returns the guest initrd path.
    pub fn initrd_asset_path(&self) -> PathBuf {
        self.asset_path(AssetType::Initrd)
    }

    /// Returns the hypervisor binary path.
    pub fn hypervisor_asset_path(&self) -> PathBuf {
        self.asset_path(AssetType::Hypervisor)
    }

    /// Returns the guest firmware path.
    pub fn firmware_asset_path(&self) -> PathBuf {
        self.asset_path(AssetType::Firmware)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> HypervisorConfig {
        HypervisorConfig::builder()
            .kernel_path("/opt/vm/vmlinuz")
            .image_path("/opt/vm/rootfs.img")
            .build()
    }

    fn assert_invalid(mut config: HypervisorConfig, expected: InvalidHypervisorConfigError) {
        match config.valid() {
            Err(MonovmError::InvalidHypervisorConfig(e)) => assert_eq!(e, expected),
            other => panic!("expected {expected:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_hypervisor_config_defaults() -> anyhow::Result<()> {
        let mut config = base_config();
        config.valid()?;

        let expected = HypervisorConfig::builder()
            .kernel_path("/opt/vm/vmlinuz")
            .image_path("/opt/vm/rootfs.img")
            .num_vcpus(DEFAULT_VCPUS)
            .default_max_vcpus(DEFAULT_MAX_VCPUS)
            .memory_mib(DEFAULT_MEMORY_MIB)
            .default_bridges(DEFAULT_BRIDGES)
            .block_device_driver(DEFAULT_BLOCK_DRIVER)
            .msize_9p(DEFAULT_MSIZE_9P)
            .build();
        assert_eq!(config, expected);

        Ok(())
    }

    #[test]
    fn test_hypervisor_config_valid_is_idempotent() -> anyhow::Result<()> {
        let mut config = HypervisorConfig::builder()
            .kernel_path("/opt/vm/vmlinuz")
            .initrd_path("/opt/vm/initrd.img")
            .num_vcpus(4)
            .boot_from_template(true)
            .memory_path("/run/template/memory")
            .devices_state_path("/run/template/state")
            .build();

        config.valid()?;
        let once = config.clone();
        config.valid()?;
        assert_eq!(config, once);
        assert_eq!(*config.get_num_vcpus(), 4);

        Ok(())
    }

    #[test]
    fn test_hypervisor_config_invalid() {
        let mut config = base_config();
        config.kernel_path = PathBuf::new();
        assert_invalid(config, InvalidHypervisorConfigError::MissingKernelPath);

        let mut config = base_config();
        config.image_path = PathBuf::new();
        assert_invalid(config, InvalidHypervisorConfigError::MissingImageAndInitrd);

        let mut config = base_config();
        config.boot_to_be_template = true;
        config.boot_from_template = true;
        config.memory_path = PathBuf::from("/run/template/memory");
        assert_invalid(config, InvalidHypervisorConfigError::ConflictingTemplateModes);

        let mut config = base_config();
        config.boot_to_be_template = true;
        assert_invalid(config, InvalidHypervisorConfigError::MissingTemplateMemoryPath);

        let mut config = base_config();
        config.boot_from_template = true;
        config.memory_path = PathBuf::from("/run/template/memory");
        assert_invalid(
            config,
            InvalidHypervisorConfigError::MissingTemplateDevicesStatePath,
        );

        let mut config = base_config();
        config.boot_to_be_template = true;
        config.memory_path = PathBuf::from("/run/template/memory");
        assert!(config.valid().is_ok());
    }

    #[test]
    fn test_hypervisor_config_kernel_params() -> anyhow::Result<()> {
        let mut config = base_config();

        config.add_kernel_param(Param::new("console", "hvc0"))?;
        assert!(matches!(
            config.add_kernel_param(Param::new("", "value")),
            Err(MonovmError::EmptyKernelParamKey)
        ));
        assert_eq!(config.get_kernel_params(), &vec![Param::new("console", "hvc0")]);

        Ok(())
    }

    #[test]
    fn test_hypervisor_config_custom_assets() -> anyhow::Result<()> {
        let mut config = base_config();
        assert_eq!(config.kernel_asset_path(), PathBuf::from("/opt/vm/vmlinuz"));
        assert!(!config.is_custom_asset(AssetType::Kernel));

        config.add_custom_asset(Asset::new(AssetType::Kernel, ""))?;
        assert!(!config.is_custom_asset(AssetType::Kernel));

        assert!(matches!(
            config.add_custom_asset(Asset::new(AssetType::Kernel, "vmlinuz")),
            Err(MonovmError::InvalidAsset { .. })
        ));

        config.add_custom_asset(Asset::new(AssetType::Kernel, "/custom/vmlinuz"))?;
        assert!(config.is_custom_asset(AssetType::Kernel));
        assert_eq!(config.kernel_asset_path(), PathBuf::from("/custom/vmlinuz"));
        assert_eq!(config.image_asset_path(), PathBuf::from("/opt/vm/rootfs.img"));
        assert_eq!(config.firmware_asset_path(), PathBuf::new());

        Ok(())
    }
}
