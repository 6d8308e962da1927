//! XDG Base Directory support for cachecmd
//!
//! Follows the XDG Base Directory Specification:
//! - https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
//!
//! Directory structure:
//! - `$XDG_CACHE_HOME/cachecmd/` (default: `~/.cache/cachecmd/`) - Cached command results
//! - `$XDG_CONFIG_HOME/cachecmd/` (default: `~/.config/cachecmd/`) - Configuration file

use std::path::PathBuf;

const APP_DIR: &str = "cachecmd";

/// Get the cachecmd cache directory
///
/// Respects XDG_CACHE_HOME environment variable.
/// Falls back to the platform cache directory, then `$HOME/.cache/cachecmd`.
///
/// # Example
/// ```
/// let cache_dir = cachecmd::xdg::cache_dir();
/// // Unix: ~/.cache/cachecmd or $XDG_CACHE_HOME/cachecmd
/// ```
pub fn cache_dir() -> PathBuf {
    if let Some(xdg_cache) = non_empty_env("XDG_CACHE_HOME") {
        PathBuf::from(xdg_cache).join(APP_DIR)
    } else if let Some(cache) = dirs::cache_dir() {
        cache.join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        // XDG spec default: $HOME/.cache
        home.join(".cache").join(APP_DIR)
    } else {
        PathBuf::from(".cachecmd-cache")
    }
}

/// Get the cachecmd configuration directory
///
/// Respects XDG_CONFIG_HOME environment variable.
pub fn config_dir() -> PathBuf {
    if let Some(xdg_config) = non_empty_env("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join(APP_DIR)
    } else if let Some(config) = dirs::config_dir() {
        config.join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config").join(APP_DIR)
    } else {
        PathBuf::from(".cachecmd-config")
    }
}

/// Default config file location
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cache_dir_respects_xdg_env() {
        std::env::set_var("XDG_CACHE_HOME", "/tmp/test-cache");
        let dir = cache_dir();
        std::env::remove_var("XDG_CACHE_HOME");
        assert_eq!(dir, PathBuf::from("/tmp/test-cache/cachecmd"));
    }

    #[test]
    #[serial]
    fn test_empty_xdg_cache_home_is_ignored() {
        std::env::set_var("XDG_CACHE_HOME", "");
        let dir = cache_dir();
        std::env::remove_var("XDG_CACHE_HOME");
        assert!(dir.ends_with("cachecmd"));
        assert_ne!(dir, PathBuf::from("cachecmd"));
    }

    #[test]
    #[serial]
    fn test_config_file_respects_xdg_env() {
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-config");
        let file = config_file();
        std::env::remove_var("XDG_CONFIG_HOME");
        assert_eq!(file, PathBuf::from("/tmp/test-config/cachecmd/config.toml"));
    }
}
