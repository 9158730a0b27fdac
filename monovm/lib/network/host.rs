use std::{
    fs::{self, OpenOptions},
    io::Write,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
};

use crate::{network::NetworkInfo, MonovmError, MonovmResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The driver physical NICs are handed to for passthrough.
pub const VFIO_PCI_DRIVER: &str = "vfio-pci";

/// Where vhost-user backends publish their sockets, one directory per IPv4 address.
pub const DEFAULT_VHOST_USER_ROOT: &str = "/tmp";

const DEFAULT_SYSFS_ROOT: &str = "/sys";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Reads host facts endpoint construction depends on and drives PCI driver binding.
///
/// Both roots can be moved, which lets the probe run against a scratch tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProbe {
    sysfs_root: PathBuf,
    vhost_user_root: PathBuf,
}

/// PCI identity of a physical network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PciInfo {
    /// The PCI address, `dddd:bb:dd.f`.
    pub bdf: String,

    /// The host driver currently bound to the device.
    pub driver: String,

    /// `<vendor> <device>` as read from sysfs, e.g. `0x8086 0x1572`.
    pub vendor_device_id: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostProbe {
    /// Creates a probe reading from `sysfs_root` and looking for vhost-user sockets under
    /// `vhost_user_root`.
    pub fn new(sysfs_root: impl Into<PathBuf>, vhost_user_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            vhost_user_root: vhost_user_root.into(),
        }
    }

    /// Whether `name` is a NIC sitting on a PCI bus.
    ///
    /// An interface without a device link, or whose device entry is not a link, is virtual.
    ///
    /// ## Errors
    ///
    /// Returns an `Io` error for any other failure to read the device link.
    pub fn is_physical_iface(&self, name: &str) -> MonovmResult<bool> {
        if name == "lo" {
            return Ok(false);
        }

        let device = self.sysfs_root.join("class/net").join(name).join("device");
        let target = match fs::read_link(&device) {
            Ok(target) => target,
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOENT | libc::EINVAL)) => {
                return Ok(false)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(target
            .file_name()
            .is_some_and(|bdf| is_pci_address(&bdf.to_string_lossy())))
    }

    /// Reads the PCI address, driver and ids of the NIC `name`.
    ///
    /// ## Errors
    ///
    /// Returns an `Io` error if the interface is not backed by a PCI device.
    pub fn pci_info(&self, name: &str) -> MonovmResult<PciInfo> {
        let device = self.sysfs_root.join("class/net").join(name).join("device");

        let bdf = link_basename(&device)?;
        let driver = link_basename(&device.join("driver"))?;

        let pci_device = self.sysfs_root.join("bus/pci/devices").join(&bdf);
        let vendor = fs::read_to_string(pci_device.join("vendor"))?;
        let device_id = fs::read_to_string(pci_device.join("device"))?;

        Ok(PciInfo {
            bdf,
            driver,
            vendor_device_id: format!("{} {}", vendor.trim(), device_id.trim())
                .trim()
                .to_string(),
        })
    }

    /// Moves a PCI device from its host driver to `vfio-pci`.
    pub fn bind_to_vfio(&self, info: &PciInfo) -> MonovmResult<()> {
        tracing::info!(bdf = %info.bdf, driver = %info.driver, "binding device to vfio-pci");

        self.write_driver_file(&info.driver, "unbind", &info.bdf)?;
        self.write_driver_file(VFIO_PCI_DRIVER, "new_id", &info.vendor_device_id)?;
        self.write_driver_file(VFIO_PCI_DRIVER, "bind", &info.bdf)
    }

    /// Moves a PCI device from `vfio-pci` back to its host driver.
    pub fn bind_to_host(&self, info: &PciInfo) -> MonovmResult<()> {
        tracing::info!(bdf = %info.bdf, driver = %info.driver, "binding device back to host");

        self.write_driver_file(VFIO_PCI_DRIVER, "unbind", &info.bdf)?;
        self.write_driver_file(VFIO_PCI_DRIVER, "remove_id", &info.vendor_device_id)?;
        self.write_driver_file(&info.driver, "bind", &info.bdf)
    }

    /// Returns the vhost-user socket serving the interface, if one exists.
    ///
    /// Only the first IPv4 address of the interface is considered. Its socket is expected at
    /// `<root>/vhostuser_<addr>/vhu.sock`.
    pub fn vhost_user_socket(&self, info: &NetworkInfo) -> Option<PathBuf> {
        let addr = info.addrs.iter().find(|a| a.address.is_ipv4())?;

        let socket = self
            .vhost_user_root
            .join(format!("vhostuser_{}", addr.address.ip()))
            .join("vhu.sock");

        match fs::metadata(&socket) {
            Ok(meta) if meta.file_type().is_socket() => Some(socket),
            _ => None,
        }
    }

    fn write_driver_file(&self, driver: &str, file: &str, value: &str) -> MonovmResult<()> {
        let path = self
            .sysfs_root
            .join("bus/pci/drivers")
            .join(driver)
            .join(file);

        tracing::debug!(path = %path.display(), %value, "writing pci driver file");

        let mut handle = OpenOptions::new().write(true).open(&path)?;
        handle.write_all(value.as_bytes())?;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn link_basename(path: &Path) -> MonovmResult<String> {
    let target = fs::read_link(path)?;

    target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| MonovmError::custom(anyhow::anyhow!("{} has no target", path.display())))
}

/// `dddd:bb:dd.f`
fn is_pci_address(bdf: &str) -> bool {
    bdf.split(':').count() == 3
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for HostProbe {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT, DEFAULT_VHOST_USER_ROOT)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::{fs::symlink, net::UnixListener};

    use crate::network::{AddrInfo, LinkAttrs};

    use super::*;

    const BDF: &str = "0000:00:03.0";

    fn fake_sysfs(root: &Path) -> anyhow::Result<()> {
        let pci_device = root.join("devices/pci0000:00").join(BDF);
        fs::create_dir_all(&pci_device)?;
        fs::write(pci_device.join("vendor"), "0x8086\n")?;
        fs::write(pci_device.join("device"), "0x1572\n")?;

        for driver in ["i40e", VFIO_PCI_DRIVER] {
            let dir = root.join("bus/pci/drivers").join(driver);
            fs::create_dir_all(&dir)?;
            for file in ["bind", "unbind", "new_id", "remove_id"] {
                fs::write(dir.join(file), "")?;
            }
        }
        symlink(
            root.join("bus/pci/drivers/i40e"),
            pci_device.join("driver"),
        )?;

        fs::create_dir_all(root.join("bus/pci/devices"))?;
        symlink(&pci_device, root.join("bus/pci/devices").join(BDF))?;

        let net = root.join("class/net/eth0");
        fs::create_dir_all(&net)?;
        symlink(&pci_device, net.join("device"))?;

        // A virtual interface has no device link.
        fs::create_dir_all(root.join("class/net/veth0"))?;

        Ok(())
    }

    #[test]
    fn test_physical_iface_detection() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fake_sysfs(dir.path())?;
        let probe = HostProbe::new(dir.path(), dir.path());

        assert!(probe.is_physical_iface("eth0")?);
        assert!(!probe.is_physical_iface("veth0")?);
        assert!(!probe.is_physical_iface("missing")?);
        assert!(!probe.is_physical_iface("lo")?);

        // A device entry that is not a link is virtual.
        fs::create_dir_all(dir.path().join("class/net/dummy0/device"))?;
        assert!(!probe.is_physical_iface("dummy0")?);

        // Anything else is a sysfs failure, not a verdict.
        fs::write(dir.path().join("class/net/broken0"), "")?;
        assert!(matches!(
            probe.is_physical_iface("broken0"),
            Err(MonovmError::Io(_))
        ));

        Ok(())
    }

    #[test]
    fn test_pci_info_and_binding() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fake_sysfs(dir.path())?;
        let probe = HostProbe::new(dir.path(), dir.path());

        let info = probe.pci_info("eth0")?;
        assert_eq!(info.bdf, BDF);
        assert_eq!(info.driver, "i40e");
        assert_eq!(info.vendor_device_id, "0x8086 0x1572");

        let drivers = dir.path().join("bus/pci/drivers");

        probe.bind_to_vfio(&info)?;
        assert_eq!(fs::read_to_string(drivers.join("i40e/unbind"))?, BDF);
        assert_eq!(
            fs::read_to_string(drivers.join("vfio-pci/new_id"))?,
            "0x8086 0x1572"
        );
        assert_eq!(fs::read_to_string(drivers.join("vfio-pci/bind"))?, BDF);

        probe.bind_to_host(&info)?;
        assert_eq!(fs::read_to_string(drivers.join("vfio-pci/unbind"))?, BDF);
        assert_eq!(
            fs::read_to_string(drivers.join("vfio-pci/remove_id"))?,
            "0x8086 0x1572"
        );
        assert_eq!(fs::read_to_string(drivers.join("i40e/bind"))?, BDF);

        assert!(probe.pci_info("veth0").is_err());

        Ok(())
    }

    #[test]
    fn test_vhost_user_socket_lookup() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let probe = HostProbe::new(dir.path(), dir.path());

        let mut info = NetworkInfo {
            iface: LinkAttrs {
                name: "eth0".into(),
                ..Default::default()
            },
            addrs: vec![
                AddrInfo::new("fe80::1/64".parse()?),
                AddrInfo::new("192.168.1.5/24".parse()?),
            ],
            ..Default::default()
        };

        assert_eq!(probe.vhost_user_socket(&info), None);

        let socket_dir = dir.path().join("vhostuser_192.168.1.5");
        fs::create_dir_all(&socket_dir)?;

        // A regular file is not a socket.
        fs::write(socket_dir.join("vhu.sock"), "")?;
        assert_eq!(probe.vhost_user_socket(&info), None);

        fs::remove_file(socket_dir.join("vhu.sock"))?;
        let _listener = UnixListener::bind(socket_dir.join("vhu.sock"))?;
        assert_eq!(
            probe.vhost_user_socket(&info),
            Some(socket_dir.join("vhu.sock"))
        );

        info.addrs.retain(|a| a.address.is_ipv6());
        assert_eq!(probe.vhost_user_socket(&info), None);

        Ok(())
    }
}
