use std::{
    fs::{File, OpenOptions},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use libc::{c_char, c_short, IFNAMSIZ};

use crate::{MonovmError, MonovmResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The TUN/TAP clone device.
pub const TUN_DEVICE: &str = "/dev/net/tun";

/// The vhost-net device.
pub const VHOST_NET_DEVICE: &str = "/dev/vhost-net";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// `struct ifreq` restricted to the name and flags members.
#[repr(C)]
struct IfReq {
    name: [c_char; IFNAMSIZ],
    flags: c_short,
    _pad: [u8; 22],
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

mod ioctl {
    use libc::c_int;

    use super::IfReq;

    nix::ioctl_write_ptr_bad!(
        tunsetiff,
        nix::request_code_write!(b'T', 202, std::mem::size_of::<c_int>()),
        IfReq
    );

    nix::ioctl_write_int!(tunsetpersist, b'T', 203);
}

/// Creates a persistent TAP device with virtio-net headers.
///
/// With `queues` set to 0 the device is single queue and no descriptor is kept. Otherwise the
/// device is multi-queue and one descriptor per queue is returned, ready to be handed to a VM.
///
/// ## Errors
///
/// Returns `InvalidInterfaceName` if `name` does not fit `IFNAMSIZ`, and `DeviceOpen` or `Nix`
/// if the clone device cannot be opened or configured. Descriptors opened before a failure are
/// closed and the device is no longer persistent, so it goes away with them.
pub fn create_tap(name: &str, queues: usize) -> MonovmResult<Vec<File>> {
    let mut flags = libc::IFF_TAP | libc::IFF_VNET_HDR;
    if queues > 0 {
        flags |= libc::IFF_MULTI_QUEUE | libc::IFF_NO_PI;
    }

    let request = ifreq(name, flags as c_short)?;

    let mut fds = Vec::with_capacity(queues.max(1));
    if let Err(e) = open_tap_queues(&request, queues.max(1), &mut fds) {
        if let Some(first) = fds.first() {
            // SAFETY: plain integer argument on a descriptor we own.
            if let Err(errno) = unsafe { ioctl::tunsetpersist(first.as_raw_fd(), 0) } {
                tracing::warn!(%name, %errno, "failed to drop persistence of tap device");
            }
        }

        return Err(e);
    }

    if queues == 0 {
        fds.clear();
    }

    tracing::debug!(%name, queues, "created tap device");
    Ok(fds)
}

fn open_tap_queues(request: &IfReq, count: usize, fds: &mut Vec<File>) -> MonovmResult<()> {
    for _ in 0..count {
        let file = open_rw(Path::new(TUN_DEVICE))?;

        // SAFETY: `request` is a properly sized, NUL-terminated ifreq that outlives the call.
        unsafe { ioctl::tunsetiff(file.as_raw_fd(), request) }?;

        if fds.is_empty() {
            // SAFETY: plain integer argument on a descriptor we own.
            unsafe { ioctl::tunsetpersist(file.as_raw_fd(), 1) }?;
        }

        fds.push(file);
    }

    Ok(())
}

/// Opens `count` queue descriptors on `queue_device` and, when `vhost_device` is given, as many
/// vhost descriptors on it.
///
/// Nothing is returned unless both batches open, so a failure leaves no descriptor open.
pub fn open_queue_fds(
    queue_device: impl AsRef<Path>,
    vhost_device: Option<&Path>,
    count: usize,
) -> MonovmResult<(Vec<File>, Vec<File>)> {
    let vm_fds = open_fds(queue_device, count)?;
    let vhost_fds = match vhost_device {
        Some(device) => open_fds(device, count)?,
        None => Vec::new(),
    };

    Ok((vm_fds, vhost_fds))
}

/// Opens `count` read-write descriptors on `device`.
///
/// The batch is all or nothing: if any open fails the ones already opened are closed.
///
/// ## Errors
///
/// Returns `DeviceOpen` naming the device that failed.
pub fn open_fds(device: impl AsRef<Path>, count: usize) -> MonovmResult<Vec<File>> {
    let device = device.as_ref();

    (0..count).map(|_| open_rw(device)).collect()
}

/// Opens `count` vhost-net descriptors.
pub fn create_vhost_fds(count: usize) -> MonovmResult<Vec<File>> {
    open_fds(VHOST_NET_DEVICE, count)
}

/// Opens `count` queue descriptors on the macvtap with interface index `link_index`, and as
/// many vhost-net descriptors unless `disable_vhost_net` is set.
pub fn create_macvtap_fds(
    link_index: u32,
    count: usize,
    disable_vhost_net: bool,
) -> MonovmResult<(Vec<File>, Vec<File>)> {
    let vhost_device = (!disable_vhost_net).then(|| Path::new(VHOST_NET_DEVICE));
    open_queue_fds(macvtap_device(link_index), vhost_device, count)
}

/// Returns the character device backing the macvtap with interface index `link_index`.
pub fn macvtap_device(link_index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/tap{link_index}"))
}

fn open_rw(device: &Path) -> MonovmResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map_err(|source| MonovmError::DeviceOpen {
            device: device.to_path_buf(),
            source,
        })
}

fn ifreq(name: &str, flags: c_short) -> MonovmResult<IfReq> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= IFNAMSIZ || bytes.contains(&0) {
        return Err(MonovmError::InvalidInterfaceName(name.to_string()));
    }

    let mut request = IfReq {
        name: [0; IFNAMSIZ],
        flags,
        _pad: [0; 22],
    };

    for (dst, src) in request.name.iter_mut().zip(bytes) {
        *dst = *src as c_char;
    }

    Ok(request)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifreq_layout() {
        assert_eq!(std::mem::size_of::<IfReq>(), 40);
    }

    #[test]
    fn test_ifreq_name_limits() -> anyhow::Result<()> {
        let request = ifreq("tap0_kata", libc::IFF_TAP as c_short)?;
        assert_eq!(request.name[0], b't' as c_char);
        assert_eq!(request.name[9], 0);

        for bad in ["", "a-very-long-ifname", "tap\0x"] {
            assert!(matches!(
                ifreq(bad, 0),
                Err(MonovmError::InvalidInterfaceName(_))
            ));
        }

        Ok(())
    }

    #[test]
    fn test_open_fds_batch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let device = dir.path().join("dev");
        std::fs::write(&device, b"")?;

        assert_eq!(open_fds(&device, 3)?.len(), 3);
        assert!(open_fds(&device, 0)?.is_empty());

        let missing = dir.path().join("missing");
        match open_fds(&missing, 2) {
            Err(MonovmError::DeviceOpen { device, .. }) => assert_eq!(device, missing),
            other => panic!("expected DeviceOpen, got {other:?}"),
        }

        Ok(())
    }

    fn open_handles(path: &Path) -> anyhow::Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir("/proc/self/fd")? {
            if std::fs::read_link(entry?.path()).is_ok_and(|target| target == path) {
                count += 1;
            }
        }

        Ok(count)
    }

    #[test]
    fn test_open_queue_fds_releases_queues_on_vhost_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let queue = dir.path().join("tap8200");
        std::fs::write(&queue, b"")?;
        let vhost = dir.path().join("vhost-net");

        match open_queue_fds(&queue, Some(&vhost), 4) {
            Err(MonovmError::DeviceOpen { device, .. }) => assert_eq!(device, vhost),
            other => panic!("expected DeviceOpen, got {other:?}"),
        }
        assert_eq!(open_handles(&queue)?, 0);

        std::fs::write(&vhost, b"")?;
        let (vm_fds, vhost_fds) = open_queue_fds(&queue, Some(&vhost), 4)?;
        assert_eq!((vm_fds.len(), vhost_fds.len()), (4, 4));
        assert_eq!(open_handles(&queue)?, 4);

        let (vm_fds, vhost_fds) = open_queue_fds(&queue, None, 2)?;
        assert_eq!((vm_fds.len(), vhost_fds.len()), (2, 0));

        Ok(())
    }

    #[test]
    fn test_macvtap_device_path() {
        assert_eq!(macvtap_device(8200), PathBuf::from("/dev/tap8200"));
    }

    #[test]
    #[ignore = "requires root privileges"]
    fn test_create_multi_queue_tap() -> anyhow::Result<()> {
        let fds = create_tap("monovmtest0", 2)?;
        assert_eq!(fds.len(), 2);

        let netlink = crate::network::NetlinkHandle::new()?;
        let link = netlink.link_by_name("monovmtest0")?;
        assert_eq!(link.link_type, "tap");
        netlink.delete_link(link.index)?;

        Ok(())
    }

    #[test]
    #[ignore = "requires root privileges"]
    fn test_create_tap_failure_leaves_no_device() -> anyhow::Result<()> {
        // The kernel caps a tap at 256 queues, so the last TUNSETIFF fails.
        assert!(create_tap("monovmtest1", 257).is_err());

        let netlink = crate::network::NetlinkHandle::new()?;
        assert!(netlink.link_by_name("monovmtest1").is_err());

        Ok(())
    }
}
