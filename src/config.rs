use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::xdg;

/// Default TTL when neither the command line nor the config file sets one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Resolved options for one invocation.
///
/// Built once at the boundary and passed by value into the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Maximum age of a record that is still served from cache.
    pub ttl: Duration,
    /// Serve hits immediately and refresh the record in the background.
    pub async_refresh: bool,
    pub cache_dir: PathBuf,
    /// Extra cache key component (e.g. the current directory).
    pub namespace_key: String,
    /// Kill the command if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl Options {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            ttl: DEFAULT_TTL,
            async_refresh: false,
            cache_dir: cache_dir.into(),
            namespace_key: String::new(),
            timeout: None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            anyhow::bail!("cache directory must not be empty");
        }
        if self.timeout == Some(Duration::ZERO) {
            anyhow::bail!("timeout must be greater than zero");
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(xdg::cache_dir())
    }
}

/// Settings read from `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheCmdConfig {
    /// Default TTL (e.g. "10s", "5m", "1h30m")
    #[serde(default)]
    pub ttl: Option<String>,

    /// Serve hits immediately and refresh in the background
    #[serde(default, rename = "async")]
    pub async_refresh: Option<bool>,

    /// Cache directory path
    #[serde(default)]
    pub cache_dir: Option<String>,

    /// Command timeout
    #[serde(default)]
    pub timeout: Option<String>,
}

impl CacheCmdConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `explicit` if given (it must exist), else the default config file
    /// if present, else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let default_path = xdg::config_file();
        if default_path.is_file() {
            tracing::debug!(path = %default_path.display(), "loading config file");
            Self::from_file(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate duration fields eagerly so a bad file fails at load time.
    pub fn validate(&self) -> Result<()> {
        if let Some(ttl) = &self.ttl {
            parse_duration(ttl).context("ttl")?;
        }
        if let Some(timeout) = &self.timeout {
            parse_duration(timeout).context("timeout")?;
        }
        Ok(())
    }

    /// Fill options not set on the command line from this file.
    pub fn resolve(&self, overrides: OptionOverrides) -> Result<Options> {
        let ttl = match overrides.ttl {
            Some(ttl) => ttl,
            None => match &self.ttl {
                Some(ttl) => parse_duration(ttl)?,
                None => DEFAULT_TTL,
            },
        };

        let timeout = match overrides.timeout {
            Some(timeout) => Some(timeout),
            None => self.timeout.as_deref().map(parse_duration).transpose()?,
        };

        let cache_dir = overrides
            .cache_dir
            .or_else(|| self.cache_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(xdg::cache_dir);

        let options = Options {
            ttl,
            async_refresh: overrides.async_refresh || self.async_refresh.unwrap_or(false),
            cache_dir,
            namespace_key: overrides.namespace_key.unwrap_or_default(),
            timeout,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Values given on the command line (or via environment), which take
/// precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct OptionOverrides {
    pub ttl: Option<Duration>,
    pub async_refresh: bool,
    pub cache_dir: Option<PathBuf>,
    pub namespace_key: Option<String>,
    pub timeout: Option<Duration>,
}

/// Parse duration string (e.g., "0", "300us", "500ms", "1.5s", "1h30m", "7d")
///
/// Accepts the compound `<number><unit>` form of Go's `time.ParseDuration`,
/// including fractional numbers, plus a `d` (day) unit. Negative durations
/// are rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| anyhow!("Missing unit in duration: {}. Use: {}", s, UNITS))?;
        let number = &rest[..number_len];
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            "d" => 86_400 * NANOS_PER_SEC,
            _ => {
                return Err(anyhow!(
                    "Invalid duration unit: {}. Use: {}",
                    unit,
                    UNITS
                ))
            }
        };

        let part = scale_duration(number, unit_nanos, s)?;
        total = total
            .checked_add(part)
            .ok_or_else(|| anyhow!("Duration out of range: {}", s))?;
    }

    Ok(total)
}

const UNITS: &str = "ns, us, ms, s, m, h, d";
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// `number` (digits with an optional fraction) times `unit_nanos`.
fn scale_duration(number: &str, unit_nanos: u128, input: &str) -> Result<Duration> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(anyhow!("Invalid duration: {}", input));
    }
    let out_of_range = || anyhow!("Duration out of range: {}", input);

    let mut nanos = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .ok()
            .and_then(|w| w.checked_mul(unit_nanos))
            .ok_or_else(out_of_range)?
    };

    // Digits past nanosecond precision of the largest unit can't contribute.
    let fraction = &fraction[..fraction.len().min(18)];
    if !fraction.is_empty() {
        let digits: u128 = fraction
            .parse()
            .map_err(|_| anyhow!("Invalid duration: {}", input))?;
        nanos = nanos
            .checked_add(digits * unit_nanos / 10u128.pow(fraction.len() as u32))
            .ok_or_else(out_of_range)?;
    }

    let secs = u64::try_from(nanos / NANOS_PER_SEC).map_err(|_| out_of_range())?;
    Ok(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
}
