//! Structured logging utilities for cachecmd
//!
//! Logs always go to stderr. The default level is `warn` so that a wrapped
//! command's own stderr is not interleaved with diagnostics unless asked for.
//!
//! # Log Format Conventions
//!
//! - `operation`: The operation being performed (e.g., "lookup", "commit")
//! - `status`: The result status ("hit", "miss", "stale", "error")
//! - `cache_key`: Record key (`v1-<hex>`)
//! - `exit_code`: Exit code of the wrapped command
//!
//! # Examples
//!
//! ```rust
//! use tracing::info;
//!
//! # let key = "v1-00";
//! info!(
//!     operation = "lookup",
//!     status = "hit",
//!     cache_key = %key,
//!     exit_code = 0,
//!     "cache hit"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "warn";

/// Custom formatter that shows "cachecmd" instead of full module path
struct CacheCmdFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for CacheCmdFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(
                writer,
                "{}{:5}(cachecmd)\x1b[0m: ",
                level_style,
                meta.level()
            )?;
        } else {
            write!(writer, "{:5}(cachecmd): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    Pretty,
    /// Same layout without colors (for CI)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (CACHECMD_LOG_FORMAT)
    pub fn from_env() -> Self {
        Self::parse(
            &std::env::var("CACHECMD_LOG_FORMAT").unwrap_or_default(),
            std::env::var_os("CI").is_some(),
        )
    }

    fn parse(value: &str, ci: bool) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn")
/// - `CACHECMD_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
///
/// # Examples
///
/// ```bash
/// # See hits, misses and commits
/// RUST_LOG=cachecmd=debug cachecmd --ttl=10s date
///
/// # JSON format
/// CACHECMD_LOG_FORMAT=json RUST_LOG=info cachecmd date
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let format = LogFormat::from_env();
    let with_ansi = format == LogFormat::Pretty && crate::cli_utils::stderr_is_terminal();

    // `try_init` so a second initialization (tests) is not fatal.
    let _ = match format {
        LogFormat::Pretty | LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(CacheCmdFormatter { with_ansi })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };
}

/// Operation names for consistent logging
pub mod operations {
    pub const LOOKUP: &str = "lookup";
    pub const REPLAY: &str = "replay";
    pub const EXECUTE: &str = "execute";
    pub const COMMIT: &str = "commit";
    pub const DISCARD: &str = "discard";
    pub const REFRESH: &str = "refresh";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const STALE: &str = "stale";
    pub const ERROR: &str = "error";
}
