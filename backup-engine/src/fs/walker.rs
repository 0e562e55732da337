//! Directory traversal for folder sources.
//!
//! Yields every regular file under a root with its archive-relative,
//! slash-normalized path. Order is deterministic (sorted by file name per
//! directory) so two walks of an unchanged tree produce identical manifests.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use super::metadata::FileMetadata;

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the root, `/`-separated, no leading slash
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,

    /// Last write time
    pub modified: DateTime<Utc>,

    /// Unix mode bits, when the platform has them
    pub permissions: Option<u32>,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Symlinks are resolved to their target; links to directories and
    /// broken links yield `None`.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();

        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => resolved,
                Err(_) => return Ok(None),
            }
        } else {
            entry.metadata()?
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        let relative = path.strip_prefix(root).unwrap_or(&path);
        let relative_path = to_slash_path(relative).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: file name is not valid UTF-8", path.display()),
            )
        })?;
        let meta = FileMetadata::from_metadata(&metadata);

        Ok(Some(Self {
            relative_path,
            path,
            size: meta.size,
            modified: meta.modified,
            permissions: meta.permissions,
        }))
    }
}

/// Join the normal components of `path` with `/`.
///
/// `None` when a component is not valid UTF-8.
pub fn to_slash_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        if let std::path::Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }
    Some(parts.join("/"))
}

/// Walk a directory tree and collect all regular files
///
/// # Example
/// ```no_run
/// use backup_engine::fs::walker::walk_directory;
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("/data")).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory(root: &Path) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;

        if entry.file_type().is_dir() {
            continue;
        }

        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            files.push(file_info);
        }
    }

    Ok(files)
}

/// Calculate total size of all files in a listing
pub fn total_size(files: &[FileInfo]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("sub/deeper"))?;
        fs::write(temp_dir.path().join("b.txt"), b"content1")?;
        fs::write(temp_dir.path().join("sub/a.txt"), b"content2")?;
        fs::write(temp_dir.path().join("sub/deeper/c.txt"), b"c")?;

        let files = walk_directory(temp_dir.path())?;
        let names: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "sub/a.txt", "sub/deeper/c.txt"]);
        assert_eq!(total_size(&files), 17);

        Ok(())
    }

    #[test]
    fn test_dotfiles_are_included() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join(".git"))?;
        fs::write(temp_dir.path().join(".git/HEAD"), b"ref")?;
        fs::write(temp_dir.path().join(".env"), b"X=1")?;

        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_to_directories_are_skipped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("real"))?;
        fs::write(temp_dir.path().join("real/file.txt"), b"x")?;
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("link"))?;
        std::os::unix::fs::symlink(temp_dir.path().join("missing"), temp_dir.path().join("broken"))?;

        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "real/file.txt");
        Ok(())
    }

    #[test]
    fn test_to_slash_path() {
        assert_eq!(to_slash_path(Path::new("a/b/c.txt")).as_deref(), Some("a/b/c.txt"));
        assert_eq!(to_slash_path(Path::new("./a/c.txt")).as_deref(), Some("a/c.txt"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_non_utf8_names_are_refused() -> std::io::Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new()?;
        let name = OsStr::from_bytes(b"bad\xff.txt");
        fs::write(temp_dir.path().join(name), b"x")?;

        assert_eq!(to_slash_path(Path::new(name)), None);
        let err = walk_directory(temp_dir.path()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("not valid UTF-8"));
        Ok(())
    }
}
