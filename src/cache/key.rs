/// Cache key generation for command caching
///
/// Generates cache keys based on:
/// - Cache structure version (bumped when the on-disk layout changes)
/// - Namespace key (optional, user supplied via `--key`)
/// - Command name and arguments
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fmt;

/// Update it when the cache structure changes.
pub const CACHE_STRUCTURE_VERSION: u32 = 1;

/// Separates the namespace segment from the command segment.
const SEGMENT_SEPARATOR: &[u8] = b":";

/// Digest identifying a command + namespace combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// File name stem used for the record's artifacts, e.g. `v1-3fa0...`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the cache key for a command invocation
///
/// The key is deterministic for identical `(namespace_key, command, args)`
/// triples. Every segment is length-prefixed, so argument boundaries and the
/// namespace/command split can't be shifted to produce the same byte stream.
/// Command and arguments are hashed as raw bytes, so non-UTF-8 arguments get
/// distinct keys.
pub fn compute_key<C, A>(namespace_key: &str, command: C, args: &[A]) -> CacheKey
where
    C: AsRef<OsStr>,
    A: AsRef<OsStr>,
{
    let mut hasher = Sha256::new();

    hasher.update(format!("cachecmd/v{CACHE_STRUCTURE_VERSION}").as_bytes());
    hasher.update(SEGMENT_SEPARATOR);

    update_segment(&mut hasher, namespace_key.as_bytes());
    hasher.update(SEGMENT_SEPARATOR);

    update_segment(&mut hasher, command.as_ref().as_encoded_bytes());
    hasher.update((args.len() as u64).to_le_bytes());
    for arg in args {
        update_segment(&mut hasher, arg.as_ref().as_encoded_bytes());
    }

    let hash = hex::encode(hasher.finalize());

    CacheKey(format!("v{}-{}", CACHE_STRUCTURE_VERSION, hash))
}

fn update_segment(hasher: &mut Sha256, segment: &[u8]) {
    hasher.update((segment.len() as u64).to_le_bytes());
    hasher.update(segment);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compute_key_deterministic() {
        let key1 = compute_key("", "date", &args(&["+%N"]));
        let key2 = compute_key("", "date", &args(&["+%N"]));

        assert_eq!(key1, key2);
        assert!(key1.as_str().starts_with("v1-"));
        // "v1-" + 64 hex chars
        assert_eq!(key1.as_str().len(), 3 + 64);
    }

    #[test]
    fn test_namespace_and_command_do_not_collide() {
        let key1 = compute_key("a", "bc", &[] as &[&str]);
        let key2 = compute_key("ab", "c", &[] as &[&str]);
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_argument_order_and_count_matter() {
        let base = compute_key("", "echo", &args(&["a", "b"]));

        assert_ne!(base, compute_key("", "echo", &args(&["b", "a"])));
        assert_ne!(base, compute_key("", "echo", &args(&["a"])));
        assert_ne!(base, compute_key("", "echo", &args(&["a b"])));
        assert_ne!(base, compute_key("", "echo", &args(&["a", "b", ""])));
        assert_ne!(
            compute_key("", "echo", &args(&["a"])),
            compute_key("", "echo a", &[] as &[&str])
        );
    }

    #[test]
    fn test_namespace_changes_key() {
        let key1 = compute_key("", "go", &args(&["list", "./..."]));
        let key2 = compute_key("/home/user/project", "go", &args(&["list", "./..."]));
        assert_ne!(key1, key2);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_arguments_are_distinct() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let latin1 = OsString::from_vec(vec![b'c', 0xe9]);
        let other = OsString::from_vec(vec![b'c', 0xe8]);

        let key1 = compute_key("", "cat", &[latin1.clone()]);
        let key2 = compute_key("", "cat", &[other]);
        assert_ne!(key1, key2);
        assert_eq!(key1, compute_key("", "cat", &[latin1]));
    }
}
