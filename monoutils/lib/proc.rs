//! Helpers that read host facts out of `/proc`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{MonoutilsError, MonoutilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Default location of the CPU information file.
pub const PROC_CPUINFO: &str = "/proc/cpuinfo";

/// Default location of the memory information file.
pub const PROC_MEMINFO: &str = "/proc/meminfo";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the total amount of host memory in KiB, as reported by the `MemTotal:` line of a
/// `meminfo` file.
///
/// Lines that do not have the `MemTotal: <n> kB` shape are skipped.
///
/// ## Errors
///
/// Returns an error if the file cannot be read or holds no usable `MemTotal:` line.
pub fn get_host_memory_size_kb(meminfo_path: impl AsRef<Path>) -> MonoutilsResult<u64> {
    let meminfo_path = meminfo_path.as_ref();
    let content = fs::read_to_string(meminfo_path)?;

    content
        .lines()
        .find_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                ["MemTotal:", size, "kB", ..] => size.parse::<u64>().ok(),
                _ => None,
            }
        })
        .ok_or_else(|| MonoutilsError::ProcFieldNotFound {
            field: "MemTotal".to_string(),
            path: PathBuf::from(meminfo_path),
        })
}

/// Checks whether the host is itself a virtual machine by looking for the `hypervisor` CPU flag.
///
/// Only the first `flags` line of the file is inspected. On architectures where the flag is not
/// exposed this always returns `false`.
///
/// ## Errors
///
/// Returns an error if the file cannot be read or holds no `flags` line.
pub fn running_on_vmm(cpuinfo_path: impl AsRef<Path>) -> MonoutilsResult<bool> {
    if cfg!(any(
        target_arch = "aarch64",
        target_arch = "powerpc64",
        target_arch = "s390x"
    )) {
        tracing::info!("unable to know if the system is running inside a VM");
        return Ok(false);
    }

    let cpuinfo_path = cpuinfo_path.as_ref();
    let content = fs::read_to_string(cpuinfo_path)?;

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 || !fields[0].starts_with("flags") {
            continue;
        }

        // The first flags line settles it.
        return Ok(fields[1..].contains(&"hypervisor"));
    }

    Err(MonoutilsError::ProcFieldNotFound {
        field: "flags".to_string(),
        path: PathBuf::from(cpuinfo_path),
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_temp(content: &str) -> anyhow::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(content.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn test_get_host_memory_size_kb() -> anyhow::Result<()> {
        let file = write_temp("MemFree:  1024 kB\nMemTotal:  16318800 kB\nBuffers: 2 kB\n")?;
        assert_eq!(get_host_memory_size_kb(file.path())?, 16318800);

        let file = write_temp("MemTotal: lots kB\nMemTotal: 42\nMemFree: 1 kB\n")?;
        assert!(matches!(
            get_host_memory_size_kb(file.path()),
            Err(MonoutilsError::ProcFieldNotFound { .. })
        ));

        assert!(matches!(
            get_host_memory_size_kb("/does/not/exist/meminfo"),
            Err(MonoutilsError::IoError(_))
        ));

        Ok(())
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_running_on_vmm() -> anyhow::Result<()> {
        let file = write_temp("processor : 0\nflags : fpu vme hypervisor sse\n")?;
        assert!(running_on_vmm(file.path())?);

        let file = write_temp("flags: fpu vme sse\nflags : hypervisor\n")?;
        assert!(!running_on_vmm(file.path())?);

        let file = write_temp("processor : 0\nmodel name : test\n")?;
        assert!(running_on_vmm(file.path()).is_err());

        let file = write_temp("")?;
        assert!(running_on_vmm(file.path()).is_err());

        assert!(running_on_vmm("/does/not/exist/cpuinfo").is_err());

        Ok(())
    }
}
