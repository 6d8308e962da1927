/// Command cache storage and retrieval
///
/// Each record is three sibling files in the cache directory, named after the
/// cache key:
///
/// - `<key>.STDOUT` - captured standard output
/// - `<key>.STDERR` - captured standard error
/// - `<key>.EXIT_CODE` - exit code as decimal text
///
/// The STDOUT artifact anchors the record: its presence makes the record
/// visible and its modification time is the record's timestamp.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::atomic::{self, StagedFile};
use super::key::CacheKey;
use crate::error::CacheCmdError;
use crate::logging::{operations, status};

const STDOUT_SUFFIX: &str = ".STDOUT";
const STDERR_SUFFIX: &str = ".STDERR";
const EXIT_CODE_SUFFIX: &str = ".EXIT_CODE";

/// Paths of the three artifacts belonging to one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub exit_code: PathBuf,
}

/// A cached result, opened for replay.
#[derive(Debug)]
pub struct CacheRecord {
    stdout: fs::File,
    stderr: fs::File,
    pub exit_code: i32,
    pub last_modified: SystemTime,
}

impl CacheRecord {
    /// Stream the cached stdout and stderr artifacts to the caller.
    pub async fn replay<O, E>(self, stdout: &mut O, stderr: &mut E) -> Result<(), CacheCmdError>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let stdout_bytes = copy_artifact(self.stdout, stdout, "cached stdout").await?;
        let stderr_bytes = copy_artifact(self.stderr, stderr, "cached stderr").await?;
        debug!(
            operation = operations::REPLAY,
            stdout_bytes,
            stderr_bytes,
            exit_code = self.exit_code,
            "replayed cached output"
        );
        Ok(())
    }
}

async fn copy_artifact<W>(
    file: fs::File,
    out: &mut W,
    stream: &'static str,
) -> Result<u64, CacheCmdError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut file = tokio::fs::File::from_std(file);
    let map = |source| CacheCmdError::Stream { stream, source };
    let copied = tokio::io::copy(&mut file, out).await.map_err(map)?;
    out.flush().await.map_err(map)?;
    Ok(copied)
}

/// Output and error artifacts being written for a key that has not been
/// committed yet.
#[derive(Debug)]
pub struct StagedRecord {
    key: CacheKey,
    stdout: StagedFile,
    stderr: StagedFile,
}

impl StagedRecord {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Cache sinks for (stdout, stderr).
    pub fn writers(&mut self) -> (&mut tokio::fs::File, &mut tokio::fs::File) {
        (self.stdout.writer(), self.stderr.writer())
    }
}

/// Command cache manager
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Open the store, creating the cache directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheCmdError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheCmdError::CacheDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self, key: &CacheKey) -> RecordPaths {
        let base = key.as_str();
        RecordPaths {
            stdout: self.dir.join(format!("{base}{STDOUT_SUFFIX}")),
            stderr: self.dir.join(format!("{base}{STDERR_SUFFIX}")),
            exit_code: self.dir.join(format!("{base}{EXIT_CODE_SUFFIX}")),
        }
    }

    /// Look up the record for `key`.
    ///
    /// A missing record and any read error are both reported as `None`: a
    /// miss is a normal outcome and never fails the invocation.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheRecord> {
        match self.try_lookup(key) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(
                    operation = operations::LOOKUP,
                    status = status::MISS,
                    cache_key = %key,
                    error = %e,
                    "cache miss"
                );
                None
            }
        }
    }

    fn try_lookup(&self, key: &CacheKey) -> io::Result<CacheRecord> {
        let paths = self.paths(key);

        let stdout = fs::File::open(&paths.stdout)?;
        let last_modified = stdout.metadata()?.modified()?;
        let stderr = fs::File::open(&paths.stderr)?;
        let exit_code = read_exit_code(&paths.exit_code);

        Ok(CacheRecord {
            stdout,
            stderr,
            exit_code,
            last_modified,
        })
    }

    /// Create temporary files for a new record of `key`.
    pub fn stage(&self, key: &CacheKey) -> Result<StagedRecord, CacheCmdError> {
        let stdout = StagedFile::new_in(&self.dir)
            .map_err(|e| CacheCmdError::cache_write("failed to create temp file", e))?;
        let stderr = StagedFile::new_in(&self.dir)
            .map_err(|e| CacheCmdError::cache_write("failed to create temp file", e))?;

        Ok(StagedRecord {
            key: key.clone(),
            stdout,
            stderr,
        })
    }

    /// Commit a staged record together with its exit code.
    ///
    /// All three artifacts are fully written and synced before the first
    /// rename. STDOUT is renamed last so the record only becomes visible
    /// (and fresh) once the other artifacts are in place. If a rename fails
    /// part-way, the STDOUT artifact is removed so the mixed record reads as
    /// a miss.
    pub async fn commit(&self, staged: StagedRecord, exit_code: i32) -> Result<(), CacheCmdError> {
        let paths = self.paths(&staged.key);

        let stdout = staged
            .stdout
            .seal()
            .await
            .map_err(|e| CacheCmdError::cache_write("failed to close stdout cache", e))?;
        let stderr = staged
            .stderr
            .seal()
            .await
            .map_err(|e| CacheCmdError::cache_write("failed to close stderr cache", e))?;
        let exit = atomic::stage(&paths.exit_code, |f| write!(f, "{exit_code}"))
            .map_err(|e| CacheCmdError::cache_write("failed to write exit code", e))?;

        let renamed = exit
            .persist(&paths.exit_code)
            .and_then(|()| stderr.persist(&paths.stderr))
            .and_then(|()| stdout.persist(&paths.stdout));

        if let Err(e) = renamed {
            if let Err(cleanup) = atomic::remove_if_exists(&paths.stdout) {
                warn!(
                    operation = operations::COMMIT,
                    status = status::ERROR,
                    cache_key = %staged.key,
                    error = %cleanup,
                    "failed to invalidate partially committed record"
                );
            }
            return Err(CacheCmdError::cache_write("failed to rename cache file", e));
        }

        debug!(
            operation = operations::COMMIT,
            status = status::SUCCESS,
            cache_key = %staged.key,
            exit_code,
            "cache record committed"
        );
        Ok(())
    }

    /// Drop a staged record and invalidate any existing record for its key.
    pub fn discard(&self, staged: StagedRecord) -> Result<(), CacheCmdError> {
        let paths = self.paths(&staged.key);

        staged
            .stdout
            .cancel(&paths.stdout)
            .map_err(|e| CacheCmdError::cache_write("failed to discard stdout cache", e))?;
        staged
            .stderr
            .cancel(&paths.stderr)
            .map_err(|e| CacheCmdError::cache_write("failed to discard stderr cache", e))?;
        atomic::remove_if_exists(&paths.exit_code)
            .map_err(|e| CacheCmdError::cache_write("failed to discard exit code", e))?;

        debug!(
            operation = operations::DISCARD,
            cache_key = %staged.key,
            "cache record invalidated"
        );
        Ok(())
    }
}

/// Whether a record written at `last_modified` is still fresh at `now`.
///
/// A zero TTL is never fresh (forced refresh). A timestamp in the future
/// counts as age zero.
pub fn is_fresh(last_modified: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    let age = now.duration_since(last_modified).unwrap_or(Duration::ZERO);
    age < ttl
}

/// Read a cached exit code, defaulting to `0` when the artifact is missing
/// or unparsable.
pub fn read_exit_code(path: &Path) -> i32 {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}
