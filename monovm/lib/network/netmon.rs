use std::process::{Command, Stdio};

use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};

use crate::{config::NetmonConfig, MonovmError, MonovmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How the network monitor of a sandbox is launched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetmonParams {
    /// The monitor binary.
    pub netmon_path: String,

    /// Whether the monitor logs at `log_level`.
    pub debug: bool,

    /// The log level passed along with `debug`.
    pub log_level: String,

    /// The runtime binary the monitor calls back into.
    pub runtime: String,

    /// The sandbox being watched.
    pub sandbox_id: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NetmonParams {
    /// Builds the launch parameters for the monitor configured in `config`.
    pub fn from_config(
        config: &NetmonConfig,
        runtime: impl Into<String>,
        sandbox_id: impl Into<String>,
        log_level: impl Into<String>,
    ) -> Self {
        Self {
            netmon_path: config.get_path().to_string_lossy().into_owned(),
            debug: *config.get_debug(),
            log_level: log_level.into(),
            runtime: runtime.into(),
            sandbox_id: sandbox_id.into(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn netmon_args(params: &NetmonParams) -> Vec<String> {
    let mut args = vec![
        "-r".to_string(),
        params.runtime.clone(),
        "-s".to_string(),
        params.sandbox_id.clone(),
    ];

    if params.debug {
        args.push("-d".to_string());
        if !params.log_level.is_empty() {
            args.push("--log".to_string());
            args.push(params.log_level.clone());
        }
    }

    args
}

/// Launches the network monitor and returns its pid.
///
/// The monitor is detached from the caller's stdio.
///
/// ## Errors
///
/// Returns `EmptyNetmonPath` if no binary is configured, or an I/O error if it cannot be spawned.
pub fn start_netmon(params: &NetmonParams) -> MonovmResult<i32> {
    if params.netmon_path.is_empty() {
        return Err(MonovmError::EmptyNetmonPath);
    }

    let child = Command::new(&params.netmon_path)
        .args(netmon_args(params))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let pid = child.id() as i32;
    tracing::info!(pid, sandbox = %params.sandbox_id, "network monitor started");

    Ok(pid)
}

/// Terminates the network monitor running as `pid`.
///
/// A missing process, or a pid that was never set, is not an error.
pub fn stop_netmon(pid: i32) -> MonovmResult<()> {
    if pid <= 0 {
        return Ok(());
    }

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {
            tracing::info!(pid, "network monitor stopped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};

    use nix::sys::wait::{waitpid, WaitStatus};
    use serial_test::serial;

    use super::*;

    fn write_script(path: &Path, body: &str) -> anyhow::Result<()> {
        fs::write(path, format!("#!/bin/sh\n{body}\n"))?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    #[test]
    fn test_netmon_args() {
        let mut params = NetmonParams {
            netmon_path: "/usr/libexec/netmon".into(),
            debug: false,
            log_level: "debug".into(),
            runtime: "/usr/bin/runtime".into(),
            sandbox_id: "sb1".into(),
        };
        assert_eq!(netmon_args(&params), ["-r", "/usr/bin/runtime", "-s", "sb1"]);

        params.debug = true;
        assert_eq!(
            netmon_args(&params),
            ["-r", "/usr/bin/runtime", "-s", "sb1", "-d", "--log", "debug"]
        );
    }

    #[test]
    fn test_netmon_params_from_config() {
        let config = NetmonConfig::builder()
            .path("/usr/libexec/netmon")
            .debug(true)
            .enable(true)
            .build();

        let params = NetmonParams::from_config(&config, "/usr/bin/runtime", "sb1", "info");
        assert_eq!(params.netmon_path, "/usr/libexec/netmon");
        assert!(params.debug);
        assert_eq!(
            netmon_args(&params),
            ["-r", "/usr/bin/runtime", "-s", "sb1", "-d", "--log", "info"]
        );
    }

    #[test]
    fn test_start_netmon_requires_path() {
        assert!(matches!(
            start_netmon(&NetmonParams::default()),
            Err(MonovmError::EmptyNetmonPath)
        ));
    }

    #[test_log::test]
    #[serial]
    fn test_start_netmon_passes_arguments() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let script = dir.path().join("netmon");
        let out = dir.path().join("args");
        write_script(&script, &format!("echo \"$@\" > {}", out.display()))?;

        let pid = start_netmon(&NetmonParams {
            netmon_path: script.to_string_lossy().into_owned(),
            runtime: "rt".into(),
            sandbox_id: "sb1".into(),
            ..Default::default()
        })?;
        assert!(pid > 0);

        let status = waitpid(Pid::from_raw(pid), None)?;
        assert!(matches!(status, WaitStatus::Exited(_, 0)));
        assert_eq!(fs::read_to_string(out)?.trim(), "-r rt -s sb1");

        Ok(())
    }

    #[test_log::test]
    #[serial]
    fn test_stop_netmon() -> anyhow::Result<()> {
        stop_netmon(0)?;
        stop_netmon(-1)?;

        let dir = tempfile::tempdir()?;
        let script = dir.path().join("netmon");
        write_script(&script, "exec sleep 30")?;

        let pid = start_netmon(&NetmonParams {
            netmon_path: script.to_string_lossy().into_owned(),
            ..Default::default()
        })?;

        stop_netmon(pid)?;
        let status = waitpid(Pid::from_raw(pid), None)?;
        assert!(matches!(status, WaitStatus::Signaled(_, Signal::SIGTERM, _)));

        Ok(())
    }
}
