// Library interface for cachecmd
// This allows integration tests and external code to use cachecmd's modules

pub mod cache;
pub mod cli;
pub mod cli_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod xdg;

// Re-export commonly used types
pub use cache::{CacheCmd, CacheSource, CacheStore, Outcome, ProcessLauncher};
pub use config::{CacheCmdConfig, Options};
pub use error::CacheCmdError;
