use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Exit code reported for infrastructure failures (as opposed to the wrapped
/// command's own status).
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Errors surfaced by the cache-or-execute core.
///
/// A non-zero exit of the wrapped command is *not* an error: it is captured,
/// cached and propagated as the process exit code.
#[derive(Error, Debug)]
pub enum CacheCmdError {
    #[error("failed to create cache directory {}: {source}", path.display())]
    CacheDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start {command}: {source}")]
    Startup {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write cache: {context}: {source}")]
    CacheWrite {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {stream}: {source}")]
    Stream {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("interrupted while running {command}")]
    Cancelled { command: String },

    #[error("{command} timed out after {}", format_duration(*.timeout))]
    TimedOut { command: String, timeout: Duration },
}

impl CacheCmdError {
    pub(crate) fn cache_write(context: impl Into<String>, source: io::Error) -> Self {
        Self::CacheWrite {
            context: context.into(),
            source,
        }
    }

    /// Process exit code to report for this failure.
    pub fn exit_code(&self) -> i32 {
        FAILURE_EXIT_CODE
    }
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_message() {
        let err = CacheCmdError::Startup {
            command: "cmd_not_found".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert_eq!(
            err.to_string(),
            "failed to start cmd_not_found: No such file or directory"
        );
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_timed_out_message() {
        let err = CacheCmdError::TimedOut {
            command: "sleep".to_string(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "sleep timed out after 1500ms");

        let err = CacheCmdError::TimedOut {
            command: "sleep".to_string(),
            timeout: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "sleep timed out after 3s");
    }
}
