/// Command executor
///
/// Spawns the wrapped command, tees its output and error streams to the
/// caller and to the cache staging files, and decodes the exit status.
use std::ffi::OsStr;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{CacheCmdError, FAILURE_EXIT_CODE};
use crate::logging::operations;

const PUMP_BUFFER_SIZE: usize = 8 * 1024;

/// Caller-visible and cache-staging destinations for one output stream.
pub struct StreamSinks<'a> {
    pub live: &'a mut (dyn AsyncWrite + Unpin + Send),
    pub cache: &'a mut (dyn AsyncWrite + Unpin + Send),
}

impl<'a> StreamSinks<'a> {
    pub fn new(
        live: &'a mut (dyn AsyncWrite + Unpin + Send),
        cache: &'a mut (dyn AsyncWrite + Unpin + Send),
    ) -> Self {
        Self { live, cache }
    }
}

/// Result of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub exit_code: i32,
    /// Terminating signal, if the process did not exit on its own.
    pub signal: Option<i32>,
    pub duration: Duration,
}

enum Interruption {
    Cancelled,
    TimedOut(Duration),
}

/// Command executor
#[derive(Debug, Clone, Default)]
pub struct Executor {
    timeout: Option<Duration>,
}

impl Executor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Run `command` with `args`, teeing both streams until the process
    /// exits.
    ///
    /// A non-zero exit is reported through [`ExitOutcome`], not as an error.
    /// Errors are reserved for a process that could not be started, a stream
    /// that could not be copied, or an execution cut short by `cancel` or the
    /// configured timeout (the child is killed in that case).
    pub async fn execute<C, A, F>(
        &self,
        command: C,
        args: &[A],
        stdout: StreamSinks<'_>,
        stderr: StreamSinks<'_>,
        cancel: F,
    ) -> Result<ExitOutcome, CacheCmdError>
    where
        C: AsRef<OsStr>,
        A: AsRef<OsStr>,
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let program = command.as_ref();
        let command = program.to_string_lossy();

        debug!(
            operation = operations::EXECUTE,
            command = %command,
            args = ?args.iter().map(AsRef::as_ref).collect::<Vec<&OsStr>>(),
            "spawning command"
        );

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CacheCmdError::Startup {
                command: command.to_string(),
                source,
            })?;

        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let mut run = Box::pin(async {
            let (out, err, status) = tokio::join!(
                pump(child_stdout, stdout, "stdout"),
                pump(child_stderr, stderr, "stderr"),
                child.wait(),
            );
            out?;
            err?;
            status.map_err(|source| CacheCmdError::Stream {
                stream: "process status",
                source,
            })
        });

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let finished = tokio::select! {
            status = &mut run => Ok(status),
            _ = cancel => Err(Interruption::Cancelled),
            _ = deadline => Err(Interruption::TimedOut(timeout.unwrap_or_default())),
        };
        drop(run);

        let status = match finished {
            Ok(status) => status?,
            Err(interruption) => {
                if let Err(e) = child.kill().await {
                    warn!(command = %command, error = %e, "failed to kill interrupted command");
                }
                return Err(match interruption {
                    Interruption::Cancelled => CacheCmdError::Cancelled {
                        command: command.to_string(),
                    },
                    Interruption::TimedOut(timeout) => CacheCmdError::TimedOut {
                        command: command.to_string(),
                        timeout,
                    },
                });
            }
        };

        let (exit_code, signal) = decode_status(status);
        let duration = start.elapsed();

        if let Some(signal) = signal {
            debug!(command = %command, signal = %signal_name(signal), "command terminated by signal");
        }
        debug!(
            operation = operations::EXECUTE,
            command = %command,
            exit_code,
            duration_ms = duration.as_millis() as u64,
            "command finished"
        );

        Ok(ExitOutcome {
            exit_code,
            signal,
            duration,
        })
    }
}

/// Copy one child stream to its live and cache sinks until EOF.
async fn pump<R>(
    reader: Option<R>,
    sinks: StreamSinks<'_>,
    stream: &'static str,
) -> Result<u64, CacheCmdError>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(0);
    };

    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|source| CacheCmdError::Stream { stream, source })?;
        if n == 0 {
            break;
        }

        sinks
            .cache
            .write_all(&buf[..n])
            .await
            .map_err(|e| CacheCmdError::cache_write(format!("failed to copy {stream} to cache"), e))?;

        sinks
            .live
            .write_all(&buf[..n])
            .await
            .map_err(|source| CacheCmdError::Stream { stream, source })?;
        sinks
            .live
            .flush()
            .await
            .map_err(|source| CacheCmdError::Stream { stream, source })?;

        total += n as u64;
    }

    Ok(total)
}

/// Decode an exit status into `(exit_code, signal)`.
///
/// A process that did not exit on its own (killed by a signal) reports
/// [`FAILURE_EXIT_CODE`].
fn decode_status(status: ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (FAILURE_EXIT_CODE, Some(signal));
        }
    }

    (FAILURE_EXIT_CODE, None)
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| signal.to_string())
}

#[cfg(not(unix))]
fn signal_name(signal: i32) -> String {
    signal.to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    struct Captured {
        live_out: Vec<u8>,
        live_err: Vec<u8>,
        cache_out: Vec<u8>,
        cache_err: Vec<u8>,
    }

    async fn run_sh(
        script: &str,
        timeout: Option<Duration>,
    ) -> (Result<ExitOutcome, CacheCmdError>, Captured) {
        let mut live_out = Vec::new();
        let mut live_err = Vec::new();
        let mut cache_out = Vec::new();
        let mut cache_err = Vec::new();

        let result = Executor::new(timeout)
            .execute(
                "sh",
                &["-c".to_string(), script.to_string()],
                StreamSinks::new(&mut live_out, &mut cache_out),
                StreamSinks::new(&mut live_err, &mut cache_err),
                std::future::pending(),
            )
            .await;

        (
            result,
            Captured {
                live_out,
                live_err,
                cache_out,
                cache_err,
            },
        )
    }

    #[tokio::test]
    async fn test_tees_both_streams() {
        let (result, captured) = run_sh("echo out; echo err >&2", None).await;
        let outcome = result.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.signal, None);
        assert_eq!(captured.live_out, b"out\n");
        assert_eq!(captured.cache_out, b"out\n");
        assert_eq!(captured.live_err, b"err\n");
        assert_eq!(captured.cache_err, b"err\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let (result, captured) = run_sh("echo failing; exit 3", None).await;
        let outcome = result.unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert_eq!(captured.cache_out, b"failing\n");
    }

    #[tokio::test]
    async fn test_killed_by_signal_reports_failure_code() {
        let (result, _) = run_sh("kill -9 $$", None).await;
        let outcome = result.unwrap();

        assert_eq!(outcome.exit_code, FAILURE_EXIT_CODE);
        assert_eq!(outcome.signal, Some(9));
    }

    #[tokio::test]
    async fn test_startup_failure() {
        let mut sink = Vec::new();
        let mut cache = Vec::new();
        let mut err_sink = Vec::new();
        let mut err_cache = Vec::new();

        let result = Executor::default()
            .execute(
                "cachecmd_command_not_found",
                &[] as &[&str],
                StreamSinks::new(&mut sink, &mut cache),
                StreamSinks::new(&mut err_sink, &mut err_cache),
                std::future::pending(),
            )
            .await;

        match result {
            Err(CacheCmdError::Startup { command, .. }) => {
                assert_eq!(command, "cachecmd_command_not_found")
            }
            other => panic!("expected startup error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streams_drain_concurrently() {
        // stderr fills its pipe before anything is written to stdout; a
        // sequential copy would deadlock here.
        let (result, captured) = run_sh(
            "head -c 200000 /dev/zero >&2; head -c 200000 /dev/zero",
            None,
        )
        .await;

        assert_eq!(result.unwrap().exit_code, 0);
        assert_eq!(captured.cache_out.len(), 200000);
        assert_eq!(captured.cache_err.len(), 200000);
        assert_eq!(captured.live_out.len(), 200000);
        assert_eq!(captured.live_err.len(), 200000);
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let start = Instant::now();
        let (result, _) = run_sh("sleep 10", Some(Duration::from_millis(200))).await;

        assert!(matches!(result, Err(CacheCmdError::TimedOut { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_kills_command() {
        let mut out = (Vec::new(), Vec::new());
        let mut err = (Vec::new(), Vec::new());

        let result = Executor::default()
            .execute(
                "sleep",
                &["10".to_string()],
                StreamSinks::new(&mut out.0, &mut out.1),
                StreamSinks::new(&mut err.0, &mut err.1),
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await;

        assert!(matches!(result, Err(CacheCmdError::Cancelled { .. })));
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(9), "SIGKILL");
    }
}
