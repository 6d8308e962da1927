/// Background cache refresh
///
/// In async mode a cache hit is served immediately and a detached re-run of
/// the same command with a zero TTL refreshes the record for the next call.
/// How that re-run is started is behind [`DetachedLauncher`]; the production
/// implementation re-spawns the current executable in its own session.
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::key::CacheKey;
use crate::logging::{operations, status};

/// Environment variable overriding the executable used for refreshes.
pub const EXECUTABLE_ENV: &str = "CACHECMD_EXECUTABLE";

/// Everything a detached refresh needs to recompute the same record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub key: CacheKey,
    pub command: OsString,
    pub args: Vec<OsString>,
    pub cache_dir: PathBuf,
    pub namespace_key: String,
    pub timeout: Option<Duration>,
}

/// Capability to start a refresh that outlives the current invocation.
pub trait DetachedLauncher: Send + Sync {
    /// Start a forced (TTL zero) re-execution and return without waiting.
    fn launch_detached(&self, request: &RefreshRequest) -> Result<()>;
}

/// Launches refreshes by re-spawning the cachecmd executable.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    executable: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
        }
    }

    /// Use `$CACHECMD_EXECUTABLE` if set, otherwise the running executable.
    /// Resolution is deferred until a refresh is launched.
    pub fn current() -> Self {
        Self::default()
    }

    fn executable(&self) -> Result<PathBuf> {
        if let Some(executable) = &self.executable {
            return Ok(executable.clone());
        }
        match std::env::var_os(EXECUTABLE_ENV) {
            Some(path) => Ok(PathBuf::from(path)),
            None => std::env::current_exe().context("Failed to resolve current executable"),
        }
    }

    /// Arguments for the refresh invocation.
    pub fn refresh_args(request: &RefreshRequest) -> Vec<OsString> {
        let mut cache_dir = OsString::from("--cache-dir=");
        cache_dir.push(&request.cache_dir);

        let mut args = vec![
            OsString::from("--ttl=0"),
            cache_dir,
            OsString::from(format!("--key={}", request.namespace_key)),
        ];
        if let Some(timeout) = request.timeout {
            args.push(OsString::from(format!("--timeout={}ms", timeout.as_millis())));
        }
        args.push(OsString::from("--"));
        args.push(request.command.clone());
        args.extend(request.args.iter().cloned());
        args
    }
}

impl DetachedLauncher for ProcessLauncher {
    fn launch_detached(&self, request: &RefreshRequest) -> Result<()> {
        let executable = self.executable()?;
        let mut cmd = Command::new(&executable);
        cmd.args(Self::refresh_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Detach from the caller's session so the refresh survives the parent
        // and never receives its terminal signals.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    nix::unistd::setsid().map_err(std::io::Error::from)?;
                    Ok(())
                });
            }
        }

        let child = cmd.spawn().with_context(|| {
            format!(
                "Failed to spawn background refresh: {}",
                executable.display()
            )
        })?;

        debug!(
            operation = operations::REFRESH,
            cache_key = %request.key,
            pid = child.id(),
            "spawned background refresh"
        );
        Ok(())
    }
}

/// Triggers detached refreshes after async-mode cache hits.
pub struct RefreshScheduler<'a> {
    launcher: &'a dyn DetachedLauncher,
}

impl<'a> RefreshScheduler<'a> {
    pub fn new(launcher: &'a dyn DetachedLauncher) -> Self {
        Self { launcher }
    }

    /// Launch a refresh for `request` without waiting for it.
    ///
    /// Returns whether the launch succeeded. A failed launch is logged and
    /// never fails the invocation that already served the cached result.
    pub fn maybe_refresh_async(&self, request: &RefreshRequest) -> bool {
        match self.launcher.launch_detached(request) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    operation = operations::REFRESH,
                    status = status::ERROR,
                    cache_key = %request.key,
                    "failed to launch background refresh: {:#}",
                    e
                );
                false
            }
        }
    }
}
