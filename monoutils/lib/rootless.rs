//! Detection of rootless execution through the user namespace uid mapping.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{MonoutilsError, MonoutilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Default location of the calling process' uid mapping.
pub const PROC_SELF_UID_MAP: &str = "/proc/self/uid_map";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the host uid that container root maps to when running rootless, or `None` when the
/// process runs as real root.
///
/// A mapping line `0 <host uid> <count>` with a non-zero host uid means root inside the user
/// namespace is an unprivileged user outside of it.
///
/// ## Errors
///
/// Returns an error if the file cannot be read or a line has fewer than two fields.
pub fn rootless_uid(uid_map_path: impl AsRef<Path>) -> MonoutilsResult<Option<u32>> {
    let uid_map_path = uid_map_path.as_ref();
    let content = fs::read_to_string(uid_map_path)?;

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let ids: Vec<&str> = line.split_whitespace().collect();
        let (inside, outside) = match ids.as_slice() {
            [inside, outside, ..] => (*inside, *outside),
            _ => {
                return Err(MonoutilsError::ProcParse {
                    path: uid_map_path.to_path_buf(),
                    line: line.to_string(),
                })
            }
        };

        if inside == "0" && outside != "0" {
            let uid = outside.parse::<u32>().map_err(|_| MonoutilsError::ProcParse {
                path: uid_map_path.to_path_buf(),
                line: line.to_string(),
            })?;

            return Ok(Some(uid));
        }
    }

    Ok(None)
}

/// Returns the per-user runtime directory used in place of `/run` when running rootless.
pub fn rootless_dir(uid: u32) -> PathBuf {
    PathBuf::from(format!("/run/user/{uid}"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_rootless_uid() -> anyhow::Result<()> {
        let mut root = NamedTempFile::new()?;
        writeln!(root, "         0          0 4294967295")?;
        assert_eq!(rootless_uid(root.path())?, None);

        let mut user = NamedTempFile::new()?;
        writeln!(user, "         0       1000          1")?;
        writeln!(user, "         1     100000      65536")?;
        assert_eq!(rootless_uid(user.path())?, Some(1000));

        let mut broken = NamedTempFile::new()?;
        writeln!(broken, "0")?;
        assert!(matches!(
            rootless_uid(broken.path()),
            Err(MonoutilsError::ProcParse { .. })
        ));

        assert_eq!(rootless_dir(1000), PathBuf::from("/run/user/1000"));

        Ok(())
    }
}
