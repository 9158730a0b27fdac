use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use monoutils::{rootless_dir, rootless_uid, FileLock, LockMode, PROC_SELF_UID_MAP};

use crate::{
    config::{
        CONTAINERS_MAP_FILENAME, CONTAINERS_MAP_LOCK_FILENAME, DEFAULT_FILE_PERMS,
        DEFAULT_RUN_STORAGE_PATH, ROOTLESS_RUN_STORAGE_SUFFIX,
    },
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Container ids and the sandboxes they belong to.
pub type ContainersMapping = BTreeMap<String, Vec<String>>;

/// The host-wide table of which sandboxes run which containers, persisted as
/// `{"<container id>": ["<sandbox id>", ...]}`.
///
/// Readers take a shared lock and writers an exclusive one, so every read-modify-write completes
/// before another process sees the file.
///
/// ## Examples
///
/// ```no_run
/// use monovm::sandbox::ContainersMap;
///
/// # fn main() -> monovm::MonovmResult<()> {
/// let map = ContainersMap::new("/run/vc/sbs");
/// map.add("ctr1", "sb1")?;
/// assert_eq!(map.fetch()?["ctr1"], vec!["sb1".to_string()]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ContainersMap {
    dir: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainersMap {
    /// Creates a map stored under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a map stored in the run storage directory of the calling user.
    pub fn open_default() -> MonovmResult<Self> {
        Ok(Self::new(run_storage_path()?))
    }

    /// Returns the directory the map is stored in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads the whole map. A map that was never written is empty.
    pub fn fetch(&self) -> MonovmResult<ContainersMapping> {
        let _lock = self.lock(LockMode::Shared)?;
        self.load()
    }

    /// Records that `container_id` runs in `sandbox_id`. Adding a known pair changes nothing.
    ///
    /// ## Errors
    ///
    /// Returns `NeedContainerId` or `NeedSandboxId` for empty ids, before any lock is taken.
    pub fn add(&self, container_id: &str, sandbox_id: &str) -> MonovmResult<()> {
        check_ids(container_id, sandbox_id)?;

        let _lock = self.lock(LockMode::Exclusive)?;
        let mut map = self.load()?;

        let sandboxes = map.entry(container_id.to_string()).or_default();
        if find_slice_index_str(sandboxes, sandbox_id) != -1 {
            return Ok(());
        }

        sandboxes.push(sandbox_id.to_string());
        self.store(&map)
    }

    /// Forgets that `container_id` runs in `sandbox_id`, dropping the container once it has no
    /// sandbox left. Deleting an unknown pair changes nothing.
    ///
    /// ## Errors
    ///
    /// Returns `NeedContainerId` or `NeedSandboxId` for empty ids, before any lock is taken.
    pub fn delete(&self, container_id: &str, sandbox_id: &str) -> MonovmResult<()> {
        check_ids(container_id, sandbox_id)?;

        let _lock = self.lock(LockMode::Exclusive)?;
        let mut map = self.load()?;

        let Some(sandboxes) = map.get_mut(container_id) else {
            return Ok(());
        };

        let idx = find_slice_index_str(sandboxes, sandbox_id);
        if idx == -1 {
            return Ok(());
        }

        sandboxes.remove(idx as usize);
        if sandboxes.is_empty() {
            map.remove(container_id);
        }

        self.store(&map)
    }

    fn lock(&self, mode: LockMode) -> MonovmResult<FileLock> {
        Ok(FileLock::acquire(self.dir.join(CONTAINERS_MAP_LOCK_FILENAME), mode)?)
    }

    fn load(&self) -> MonovmResult<ContainersMapping> {
        let content = match fs::read_to_string(self.dir.join(CONTAINERS_MAP_FILENAME)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ContainersMapping::new()),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(ContainersMapping::new());
        }

        Ok(serde_json::from_str(&content)?)
    }

    fn store(&self, map: &ContainersMapping) -> MonovmResult<()> {
        let path = self.dir.join(CONTAINERS_MAP_FILENAME);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(DEFAULT_FILE_PERMS)
            .open(&path)?;

        file.write_all(&serde_json::to_vec(map)?)?;

        tracing::debug!(path = %path.display(), containers = map.len(), "containers map stored");
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn check_ids(container_id: &str, sandbox_id: &str) -> MonovmResult<()> {
    if container_id.is_empty() {
        return Err(MonovmError::NeedContainerId);
    }

    if sandbox_id.is_empty() {
        return Err(MonovmError::NeedSandboxId);
    }

    Ok(())
}

/// Returns the directory holding sandbox bookkeeping for the calling user.
///
/// Rootless callers get `/run/user/<uid>/vc/sbs` instead of [`DEFAULT_RUN_STORAGE_PATH`].
pub fn run_storage_path() -> MonovmResult<PathBuf> {
    match rootless_uid(PROC_SELF_UID_MAP)? {
        Some(uid) => Ok(rootless_dir(uid).join(ROOTLESS_RUN_STORAGE_SUFFIX)),
        None => Ok(PathBuf::from(DEFAULT_RUN_STORAGE_PATH)),
    }
}

/// Returns the index of `val` in `slice`, or -1 if it is absent.
pub fn find_slice_index_str<S: AsRef<str>>(slice: &[S], val: &str) -> isize {
    slice
        .iter()
        .position(|elem| elem.as_ref() == val)
        .map_or(-1, |idx| idx as isize)
}

/// Reads the containers map of the calling user.
pub fn fetch_containers_map() -> MonovmResult<ContainersMapping> {
    ContainersMap::open_default()?.fetch()
}

/// Records a container/sandbox pair in the containers map of the calling user.
pub fn add_to_containers_map(container_id: &str, sandbox_id: &str) -> MonovmResult<()> {
    check_ids(container_id, sandbox_id)?;
    ContainersMap::open_default()?.add(container_id, sandbox_id)
}

/// Removes a container/sandbox pair from the containers map of the calling user.
pub fn del_from_containers_map(container_id: &str, sandbox_id: &str) -> MonovmResult<()> {
    check_ids(container_id, sandbox_id)?;
    ContainersMap::open_default()?.delete(container_id, sandbox_id)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn test_find_slice_index_str() {
        let empty: [&str; 0] = [];
        assert_eq!(find_slice_index_str(&empty, ""), -1);
        assert_eq!(find_slice_index_str(&["val1", "val2"], "val2"), 1);
        assert_eq!(find_slice_index_str(&["val1", "val2"], "val3"), -1);
    }

    #[test]
    fn test_fetch_missing_map_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let map = ContainersMap::new(dir.path().join("sbs"));

        assert!(map.fetch()?.is_empty());
        assert!(map.dir().join(CONTAINERS_MAP_LOCK_FILENAME).exists());

        Ok(())
    }

    #[test]
    fn test_fetch_existing_map() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join(CONTAINERS_MAP_FILENAME),
            r#"{"12345": ["67890"]}"#,
        )?;

        let fetched = ContainersMap::new(dir.path()).fetch()?;
        assert_eq!(fetched["12345"], vec!["67890".to_string()]);

        Ok(())
    }

    #[test]
    fn test_empty_ids_are_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let map = ContainersMap::new(dir.path().join("sbs"));

        assert!(matches!(map.add("", "sb"), Err(MonovmError::NeedContainerId)));
        assert!(matches!(map.add("ctr", ""), Err(MonovmError::NeedSandboxId)));
        assert!(matches!(map.delete("", "sb"), Err(MonovmError::NeedContainerId)));
        assert!(matches!(map.delete("ctr", ""), Err(MonovmError::NeedSandboxId)));

        // Nothing was locked, so nothing was created.
        assert!(!map.dir().exists());

        Ok(())
    }

    #[test_log::test]
    fn test_add_and_delete() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let map = ContainersMap::new(dir.path());

        map.add("ctr1", "sb1")?;
        map.add("ctr1", "sb1")?;
        map.add("ctr1", "sb2")?;
        map.add("ctr2", "sb1")?;

        let fetched = map.fetch()?;
        assert_eq!(fetched["ctr1"], vec!["sb1".to_string(), "sb2".to_string()]);
        assert_eq!(fetched["ctr2"], vec!["sb1".to_string()]);

        let mode = fs::metadata(dir.path().join(CONTAINERS_MAP_FILENAME))?
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        map.delete("ctr1", "sb3")?;
        map.delete("ctr3", "sb1")?;
        assert_eq!(map.fetch()?, fetched);

        map.delete("ctr1", "sb1")?;
        map.delete("ctr2", "sb1")?;

        let fetched = map.fetch()?;
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched["ctr1"], vec!["sb2".to_string()]);

        let raw = fs::read_to_string(dir.path().join(CONTAINERS_MAP_FILENAME))?;
        assert_eq!(raw, r#"{"ctr1":["sb2"]}"#);

        Ok(())
    }

    #[test]
    fn test_default_map_rejects_empty_ids_first() {
        assert!(matches!(
            add_to_containers_map("", "sb"),
            Err(MonovmError::NeedContainerId)
        ));
        assert!(matches!(
            del_from_containers_map("ctr", ""),
            Err(MonovmError::NeedSandboxId)
        ));
    }
}
