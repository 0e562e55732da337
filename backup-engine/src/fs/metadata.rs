//! File metadata captured at backup time and re-applied on restore.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Metadata recorded for each archived file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last write time
    pub modified: DateTime<Utc>,

    /// File permissions (Unix mode bits)
    pub permissions: Option<u32>,
}

impl FileMetadata {
    /// Extract metadata from a file path
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_metadata(&fs::metadata(path)?))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let permissions = None;

        Self {
            size: metadata.len(),
            modified,
            permissions,
        }
    }
}

/// Re-apply last write time and (on Unix) permission bits to a restored file.
pub fn apply_to_path(
    path: &Path,
    modified: Option<DateTime<Utc>>,
    permissions: Option<u32>,
) -> std::io::Result<()> {
    if let Some(modified) = modified {
        let file = fs::File::options().write(true).open(path)?;
        file.set_modified(SystemTime::from(modified))?;
    }

    #[cfg(unix)]
    if let Some(mode) = permissions {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    }

    #[cfg(not(unix))]
    let _ = permissions;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;

        assert_eq!(metadata.size, 12);
        assert!(metadata.modified.timestamp() > 0);

        Ok(())
    }

    #[test]
    fn test_apply_modified_time() -> std::io::Result<()> {
        let temp_file = NamedTempFile::new()?;
        let when = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();

        apply_to_path(temp_file.path(), Some(when), None)?;

        let metadata = FileMetadata::from_path(temp_file.path())?;
        assert_eq!(metadata.modified, when);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_permissions_preservation() -> std::io::Result<()> {
        let temp_file = NamedTempFile::new()?;

        apply_to_path(temp_file.path(), None, Some(0o100640))?;

        let metadata = FileMetadata::from_path(temp_file.path())?;
        assert_eq!(metadata.permissions.map(|m| m & 0o777), Some(0o640));

        Ok(())
    }
}
