use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{parse_duration, OptionOverrides};

const EXAMPLES: &str = "\
Examples:
  $ cachecmd --ttl=10s date +%S
  14 # First run
  $ sleep 5s
  $ cachecmd --ttl=10s date +%S
  14 # Read from cache
  $ sleep 5s
  $ cachecmd --ttl=10s date +%S
  24 # cache is expired. Run command again and update cache.

  # Force update: set --ttl=0
  $ cachecmd --ttl=0 date +%S

  # TTL is 10 min. Return cached result immediately and update the cache
  # in background for every run.
  $ cachecmd --ttl=10m --async sh -c 'date +%s; sleep 3s'

  # Cache result by current directory.
  $ cachecmd --ttl=10m --key=\"$(pwd)\" go list ./...";

/// cachecmd runs a given command and caches the result of the command.
/// Return cached result instead if cache found.
#[derive(Parser, Debug)]
#[command(name = "cachecmd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a command and cache its result", long_about = None)]
#[command(after_long_help = EXAMPLES)]
pub struct Cli {
    /// TTL (time to live) of cache, e.g. "10s", "5m", "1h30m" [default: 1m]
    #[arg(long, env = "CACHECMD_TTL", value_parser = duration_arg)]
    pub ttl: Option<Duration>,

    /// Return result from cache immediately and update cache in background
    #[arg(long = "async")]
    pub async_refresh: bool,

    /// Cache directory
    #[arg(long, alias = "cache_dir", env = "CACHECMD_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Cache key in addition to the given command
    #[arg(long, env = "CACHECMD_KEY")]
    pub key: Option<String>,

    /// Kill the command if it runs longer than this
    #[arg(long, env = "CACHECMD_TIMEOUT", value_parser = duration_arg)]
    pub timeout: Option<Duration>,

    /// Config file path
    #[arg(short = 'c', long, env = "CACHECMD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Command to run, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<OsString>,
}

impl Cli {
    pub fn overrides(&self) -> OptionOverrides {
        OptionOverrides {
            ttl: self.ttl,
            async_refresh: self.async_refresh,
            cache_dir: self.cache_dir.clone(),
            namespace_key: self.key.clone(),
            timeout: self.timeout,
        }
    }

    /// Long help text, rendered for the usage error path.
    pub fn usage() -> String {
        Self::command().render_long_help().to_string()
    }
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}
