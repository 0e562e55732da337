//! Per-run staging directories.
//!
//! Every run gets `{staging_root}/{base}_{token}` where the token is a fresh
//! UUID, so concurrent runs never share a file name. The directory and all
//! files in it are removed when the guard drops, on every exit path.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::utils::Result;

pub struct StagingArea {
    dir: PathBuf,
    token: String,
}

impl StagingArea {
    /// Claim a fresh staging directory below `root`.
    pub fn create(root: &Path, base_name: &str) -> Result<Self> {
        let token = Uuid::new_v4().simple().to_string();
        let dir = root.join(format!("{}_{}", base_name, token));
        if dir.exists() {
            warn!(dir = %dir.display(), "Removing stale staging directory");
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Staging directory created");
        Ok(Self { dir, token })
    }

    /// Path for a staged file; a leftover file of the same name is removed.
    pub fn file(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(path)
    }

    /// Directory for staged files that need their own tree.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir.display(), "Staging directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "Failed to remove staging directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_removed_on_drop() -> Result<()> {
        let root = TempDir::new()?;
        let staged;
        {
            let staging = StagingArea::create(root.path(), "docs_20240101_020000")?;
            staged = staging.file("docs_20240101_020000.zip")?;
            std::fs::write(&staged, b"x")?;
            std::fs::write(staging.subdir("dump")?.join("db.dump"), b"y")?;
            assert!(staged.exists());
        }
        assert!(!staged.exists());
        assert_eq!(std::fs::read_dir(root.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_tokens_are_unique() -> Result<()> {
        let root = TempDir::new()?;
        let a = StagingArea::create(root.path(), "same")?;
        let b = StagingArea::create(root.path(), "same")?;
        assert_ne!(a.token(), b.token());
        assert_ne!(a.dir(), b.dir());
        Ok(())
    }

    #[test]
    fn test_removed_during_unwind() -> Result<()> {
        let root = TempDir::new()?;
        let root_path = root.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let staging = StagingArea::create(&root_path, "boom").unwrap();
            std::fs::write(staging.file("a").unwrap(), b"x").unwrap();
            panic!("stage failed");
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(root.path())?.count(), 0);
        Ok(())
    }
}
