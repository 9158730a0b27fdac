use crate::config::NetInterworkingModel;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default number of vCPUs a VM boots with.
pub const DEFAULT_VCPUS: u32 = 1;

/// The default ceiling for vCPU hotplug.
pub const DEFAULT_MAX_VCPUS: u32 = 240;

/// The default amount of RAM in MiB a VM boots with.
pub const DEFAULT_MEMORY_MIB: u32 = 2048;

/// The default number of PCI bridges available for hotplug.
pub const DEFAULT_BRIDGES: u32 = 1;

/// The default block device driver.
pub const DEFAULT_BLOCK_DRIVER: &str = "virtio-scsi";

/// The default msize used for 9p shares.
pub const DEFAULT_MSIZE_9P: u32 = 8192;

/// The interworking model used when a configuration asks for the default one.
pub const DEFAULT_NET_INTERWORKING_MODEL: NetInterworkingModel = NetInterworkingModel::MacVtap;

/// The default transmit queue length of devices created for a VM.
pub const DEFAULT_QLEN: u32 = 1500;

/// The directory where named network namespaces are bind mounted.
pub const DEFAULT_NETNS_RUN_DIR: &str = "/run/netns";

/// The prefix given to network namespaces created by the runtime.
pub const NETNS_NAME_PREFIX: &str = "cni-";

/// The storage directory holding sandbox bookkeeping files.
pub const DEFAULT_RUN_STORAGE_PATH: &str = "/run/vc/sbs";

/// The storage directory relative to the per-user runtime directory when running rootless.
pub const ROOTLESS_RUN_STORAGE_SUFFIX: &str = "vc/sbs";

/// The name of the advisory lock file guarding the containers map.
pub const CONTAINERS_MAP_LOCK_FILENAME: &str = "sandboxes.lock";

/// The name of the file holding the containers map.
pub const CONTAINERS_MAP_FILENAME: &str = "containers.json";

/// The permissions of files written next to the lock file.
pub const DEFAULT_FILE_PERMS: u32 = 0o600;
