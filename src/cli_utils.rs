/// CLI utilities for consistent diagnostic formatting
use std::io::IsTerminal;

pub fn stderr_is_terminal() -> bool {
    std::io::stderr().is_terminal()
}

/// Get the diagnostic prefix
///
/// Returns bright cyan if stderr is a TTY, plain text otherwise.
pub fn cachecmd_prefix() -> &'static str {
    if stderr_is_terminal() {
        "\x1b[96mcachecmd:\x1b[0m"
    } else {
        "cachecmd:"
    }
}

/// Print a one-line diagnostic to stderr, prefixed with the tool name.
pub fn report_error(err: &dyn std::fmt::Display) {
    eprintln!("{} {}", cachecmd_prefix(), err);
}
