//! Stage-then-rename writes for cache artifacts
//!
//! Every artifact is written to a uniquely named temporary file in the *same
//! directory* as its final path and then renamed over it. Rename within one
//! filesystem is atomic, so a reader sees either the previous artifact or the
//! new one, never a partial write.
//!
//! Temporary files are owned by [`tempfile::TempPath`], which deletes them on
//! drop. Any early return before the rename therefore cleans up after itself.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Prefix of in-flight temporary files inside the cache directory.
pub const TEMP_PREFIX: &str = "tmp_cachecmd_";

/// A temporary file being populated by an async writer.
#[derive(Debug)]
pub struct StagedFile {
    file: tokio::fs::File,
    path: TempPath,
}

impl StagedFile {
    /// Create a uniquely named temporary file in `dir`.
    pub fn new_in(dir: &Path) -> io::Result<Self> {
        let (file, path) = temp_file_in(dir)?.into_parts();
        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sink the staged content is written to.
    pub fn writer(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }

    /// Flush, sync and close the file. The result can then be renamed into
    /// place with [`SealedFile::persist`].
    pub async fn seal(mut self) -> io::Result<SealedFile> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        Ok(SealedFile { path: self.path })
    }

    /// Seal the file and rename it over `target`.
    pub async fn commit(self, target: &Path) -> io::Result<()> {
        self.seal().await?.persist(target)
    }

    /// Discard the staged content and invalidate `target`.
    ///
    /// Used when the attempt must not produce a cached result: any record
    /// already at `target` is removed rather than left behind.
    pub fn cancel(self, target: &Path) -> io::Result<()> {
        debug!(temp = %self.path.display(), target = %target.display(), "discarding staged file");
        drop(self.file);
        self.path.close()?;
        remove_if_exists(target)
    }
}

/// A fully written, closed temporary file waiting to be renamed.
#[derive(Debug)]
pub struct SealedFile {
    path: TempPath,
}

impl SealedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename over `target`. On failure the temporary file is removed and
    /// `target` is left untouched.
    pub fn persist(self, target: &Path) -> io::Result<()> {
        self.path.persist(target).map_err(|e| e.error)
    }
}

/// Write `target` atomically, populating the temporary file with `write`.
///
/// The temporary file lives in `target`'s directory. If `write`, the sync or
/// the rename fails, the temporary file is removed and `target` is untouched.
pub fn stage_and_commit<F>(target: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut fs::File) -> io::Result<()>,
{
    let sealed = stage(target, write)?;
    sealed.persist(target)
}

/// Like [`stage_and_commit`] but stops before the rename.
pub fn stage<F>(target: &Path, write: F) -> io::Result<SealedFile>
where
    F: FnOnce(&mut fs::File) -> io::Result<()>,
{
    let dir = parent_dir(target);
    let (mut file, path) = temp_file_in(&dir)?.into_parts();

    write(&mut file)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    Ok(SealedFile { path })
}

/// Remove `path`, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn temp_file_in(dir: &Path) -> io::Result<tempfile::NamedTempFile> {
    tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)
}

fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if parent != Path::new("") => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(TEMP_PREFIX))
            .collect()
    }

    #[test]
    fn test_stage_and_commit_replaces_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("artifact");
        fs::write(&target, "old").unwrap();

        stage_and_commit(&target, |f| f.write_all(b"new")).unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert!(temp_files(temp.path()).is_empty());
    }

    #[test]
    fn test_failed_write_leaves_target_untouched() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("artifact");
        fs::write(&target, "old").unwrap();

        let result = stage_and_commit(&target, |f| {
            f.write_all(b"partial")?;
            Err(io::Error::other("disk full"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        assert!(temp_files(temp.path()).is_empty());
    }

    #[test]
    fn test_stage_is_invisible_until_persist() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("artifact");
        fs::write(&target, "old").unwrap();

        let sealed = stage(&target, |f| f.write_all(b"new")).unwrap();
        assert_eq!(sealed.path().parent(), Some(temp.path()));
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");

        sealed.persist(&target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn test_dropped_seal_cleans_up() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("artifact");

        let sealed = stage(&target, |f| f.write_all(b"new")).unwrap();
        assert_eq!(temp_files(temp.path()).len(), 1);
        drop(sealed);

        assert!(temp_files(temp.path()).is_empty());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_staged_file_commit() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("artifact");

        let mut staged = StagedFile::new_in(temp.path()).unwrap();
        assert!(staged
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(TEMP_PREFIX));
        staged.writer().write_all(b"hello").await.unwrap();
        staged.commit(&target).await.unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
        assert!(temp_files(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_staged_file_cancel_invalidates_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("artifact");
        fs::write(&target, "stale").unwrap();

        let mut staged = StagedFile::new_in(temp.path()).unwrap();
        staged.writer().write_all(b"ignored").await.unwrap();
        staged.cancel(&target).unwrap();

        assert!(!target.exists());
        assert!(temp_files(temp.path()).is_empty());
    }

    #[test]
    fn test_remove_if_exists_ignores_missing() {
        let temp = TempDir::new().unwrap();
        remove_if_exists(&temp.path().join("missing")).unwrap();
    }
}
