/// Cache-or-execute orchestration
///
/// `CheckCache -> Hit -> ServeCached [-> SpawnRefresh]` or
/// `CheckCache -> Miss -> Execute -> Commit | Discard`.
use std::ffi::OsString;
use std::future::Future;
use std::time::SystemTime;

use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use super::executor::{Executor, StreamSinks};
use super::key::{compute_key, CacheKey};
use super::refresh::{DetachedLauncher, RefreshRequest, RefreshScheduler};
use super::store::{is_fresh, CacheStore};
use crate::config::Options;
use crate::error::CacheCmdError;
use crate::logging::{operations, status};

/// Where the reported result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Hit,
    Miss,
}

/// Result of one cachecmd invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Exit code of the wrapped command, live or replayed.
    pub exit_code: i32,
    pub source: CacheSource,
    /// Whether a background refresh was launched after a hit.
    pub refresh_launched: bool,
}

/// Runs a command through the cache.
#[derive(Debug, Clone)]
pub struct CacheCmd {
    options: Options,
    command: OsString,
    args: Vec<OsString>,
    now: Option<SystemTime>,
}

impl CacheCmd {
    pub fn new<I, S>(options: Options, command: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            options,
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            now: None,
        }
    }

    /// Build from a command vector `[name, arg1, ..]`. Returns `None` for an
    /// empty vector.
    pub fn from_argv(options: Options, argv: Vec<OsString>) -> Option<Self> {
        let mut argv = argv.into_iter();
        let command = argv.next()?;
        Some(Self::new(options, command, argv.collect::<Vec<_>>()))
    }

    /// Evaluate freshness against a fixed clock instead of the system time.
    pub fn with_now(mut self, now: SystemTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn key(&self) -> CacheKey {
        compute_key(&self.options.namespace_key, &self.command, &self.args)
    }

    /// Serve the cached result if fresh, otherwise execute and record.
    ///
    /// `cancel` resolving while the command runs kills it and discards the
    /// staged record.
    pub async fn run<O, E, F>(
        &self,
        stdout: &mut O,
        stderr: &mut E,
        launcher: &dyn DetachedLauncher,
        cancel: F,
    ) -> Result<Outcome, CacheCmdError>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
        F: Future<Output = ()>,
    {
        let store = CacheStore::open(&self.options.cache_dir)?;
        let key = self.key();
        let now = self.now.unwrap_or_else(SystemTime::now);

        if let Some(record) = store.lookup(&key) {
            if is_fresh(record.last_modified, self.options.ttl, now) {
                let exit_code = record.exit_code;
                info!(
                    operation = operations::LOOKUP,
                    status = status::HIT,
                    cache_key = %key,
                    exit_code,
                    "cache hit"
                );
                record.replay(stdout, stderr).await?;

                let refresh_launched = self.options.async_refresh
                    && RefreshScheduler::new(launcher)
                        .maybe_refresh_async(&self.refresh_request(&key));

                return Ok(Outcome {
                    exit_code,
                    source: CacheSource::Hit,
                    refresh_launched,
                });
            }

            debug!(
                operation = operations::LOOKUP,
                status = status::STALE,
                cache_key = %key,
                "cache expired"
            );
        } else {
            info!(
                operation = operations::LOOKUP,
                status = status::MISS,
                cache_key = %key,
                "cache miss"
            );
        }

        let exit_code = self
            .execute_and_record(&store, &key, stdout, stderr, cancel)
            .await?;

        Ok(Outcome {
            exit_code,
            source: CacheSource::Miss,
            refresh_launched: false,
        })
    }

    async fn execute_and_record<O, E, F>(
        &self,
        store: &CacheStore,
        key: &CacheKey,
        stdout: &mut O,
        stderr: &mut E,
        cancel: F,
    ) -> Result<i32, CacheCmdError>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
        F: Future<Output = ()>,
    {
        let mut staged = store.stage(key)?;

        let result = {
            let (cache_stdout, cache_stderr) = staged.writers();
            Executor::new(self.options.timeout)
                .execute(
                    &self.command,
                    &self.args,
                    StreamSinks::new(stdout, cache_stdout),
                    StreamSinks::new(stderr, cache_stderr),
                    cancel,
                )
                .await
        };

        match result {
            Ok(outcome) => {
                store.commit(staged, outcome.exit_code).await?;
                Ok(outcome.exit_code)
            }
            Err(e @ CacheCmdError::Startup { .. }) => {
                // A command that cannot start invalidates the record instead
                // of refreshing it.
                if let Err(discard) = store.discard(staged) {
                    warn!(
                        operation = operations::DISCARD,
                        status = status::ERROR,
                        cache_key = %key,
                        error = %discard,
                        "failed to invalidate cache record"
                    );
                }
                Err(e)
            }
            Err(e) => {
                debug!(
                    operation = operations::DISCARD,
                    cache_key = %key,
                    error = %e,
                    "dropping staged record"
                );
                drop(staged);
                Err(e)
            }
        }
    }

    fn refresh_request(&self, key: &CacheKey) -> RefreshRequest {
        RefreshRequest {
            key: key.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            cache_dir: self.options.cache_dir.clone(),
            namespace_key: self.options.namespace_key.clone(),
            timeout: self.options.timeout,
        }
    }
}
