use std::{
    fs::{self, File},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    thread,
};

use nix::{
    errno::Errno,
    mount::{mount, umount2, MntFlags, MsFlags},
    sched::{setns, unshare, CloneFlags},
};

use crate::{
    config::{DEFAULT_NETNS_RUN_DIR, NETNS_NAME_PREFIX},
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The network namespace of the calling thread.
const THREAD_SELF_NETNS: &str = "/proc/thread-self/ns/net";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates a network namespace pinned by a bind mount under `/run/netns`.
///
/// No process lives in the new namespace. Its path is returned.
pub fn create_netns() -> MonovmResult<PathBuf> {
    create_netns_in(DEFAULT_NETNS_RUN_DIR)
}

/// Creates a network namespace pinned by a bind mount at `<run_dir>/cni-<uuid>`.
pub fn create_netns_in(run_dir: impl AsRef<Path>) -> MonovmResult<PathBuf> {
    let run_dir = run_dir.as_ref();
    fs::create_dir_all(run_dir)?;

    let path = run_dir.join(format!("{NETNS_NAME_PREFIX}{}", uuid::Uuid::new_v4()));
    File::create(&path)?;

    let result = thread::scope(|s| {
        s.spawn(|| -> MonovmResult<()> {
            // The namespace dies with this thread unless the bind mount pins it.
            unshare(CloneFlags::CLONE_NEWNET)?;
            mount(
                Some(THREAD_SELF_NETNS),
                path.as_path(),
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )?;
            Ok(())
        })
        .join()
        .unwrap_or_else(|_| Err(MonovmError::custom(anyhow::anyhow!("netns thread panicked"))))
    });

    if let Err(e) = result {
        let _ = fs::remove_file(&path);
        return Err(e);
    }

    tracing::info!(path = %path.display(), "created network namespace");
    Ok(path)
}

/// Unmounts and removes a namespace created by [`create_netns`].
///
/// A namespace that is already gone is not an error.
pub fn delete_netns(path: impl AsRef<Path>) -> MonovmResult<()> {
    let path = path.as_ref();

    match umount2(path, MntFlags::MNT_DETACH) {
        Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => {}
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to unmount namespace");
            return Err(e.into());
        }
    }

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    tracing::info!(path = %path.display(), "deleted network namespace");
    Ok(())
}

/// Runs `f` inside the network namespace at `netns_path` and returns its result.
///
/// An empty path runs `f` in place. Otherwise `f` runs on a dedicated thread that joins the
/// namespace and switches back before exiting, so no other code ever runs in it by accident.
///
/// ## Examples
///
/// ```
/// use monovm::network::do_netns;
///
/// let answer = do_netns("", || Ok(42))?;
/// assert_eq!(answer, 42);
/// # Ok::<(), monovm::MonovmError>(())
/// ```
pub fn do_netns<T, F>(netns_path: &str, f: F) -> MonovmResult<T>
where
    F: FnOnce() -> MonovmResult<T> + Send,
    T: Send,
{
    if netns_path.is_empty() {
        return f();
    }

    let target = File::open(netns_path)?;

    thread::scope(|s| {
        s.spawn(move || {
            let origin = File::open(THREAD_SELF_NETNS)?;

            setns(&target, CloneFlags::CLONE_NEWNET)?;
            tracing::trace!(netns = %netns_path, "entered network namespace");

            let result = f();

            if let Err(e) = setns(&origin, CloneFlags::CLONE_NEWNET) {
                tracing::error!(netns = %netns_path, error = %e, "failed to leave network namespace");
                return Err(e.into());
            }

            result
        })
        .join()
        .unwrap_or_else(|_| Err(MonovmError::custom(anyhow::anyhow!("netns thread panicked"))))
    })
}

/// Whether `netns_path` is the namespace the caller already runs in.
pub fn host_networking_requested(netns_path: &str) -> MonovmResult<bool> {
    let target = fs::metadata(netns_path)?;
    let current = fs::metadata(THREAD_SELF_NETNS)?;

    Ok(target.dev() == current.dev() && target.ino() == current.ino())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_do_netns_empty_path_runs_inline() -> anyhow::Result<()> {
        let calls = AtomicUsize::new(0);
        let caller = thread::current().id();

        let ran_on = do_netns("", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(thread::current().id())
        })?;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ran_on, caller);

        Ok(())
    }

    #[test]
    fn test_do_netns_propagates_errors() {
        let result: MonovmResult<()> = do_netns("", || Err(MonovmError::NeedSandboxId));
        assert!(matches!(result, Err(MonovmError::NeedSandboxId)));

        let result = do_netns("/nonexistent/netns", || Ok(()));
        assert!(matches!(result, Err(MonovmError::Io(_))));
    }

    #[test]
    fn test_host_networking_requested_for_own_namespace() -> anyhow::Result<()> {
        assert!(host_networking_requested(THREAD_SELF_NETNS)?);
        assert!(host_networking_requested("/proc/self/ns/net")?);
        assert!(host_networking_requested("/nonexistent").is_err());
        Ok(())
    }

    #[test]
    fn test_delete_netns_tolerates_missing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        delete_netns(dir.path().join("cni-gone"))?;
        Ok(())
    }

    #[test]
    #[ignore = "requires root privileges"]
    fn test_netns_lifecycle() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = create_netns_in(dir.path())?;
        let path_str = path.to_string_lossy().into_owned();

        assert!(!host_networking_requested(&path_str)?);

        let inside = do_netns(&path_str, || host_networking_requested(&path_str))?;
        assert!(inside);

        // The caller never left its own namespace.
        assert!(!host_networking_requested(&path_str)?);

        delete_netns(&path)?;
        assert!(!path.exists());

        Ok(())
    }
}
