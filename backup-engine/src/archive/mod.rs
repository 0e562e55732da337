//! Manifest-indexed zip archives.
//!
//! Entries are compressed individually so any one of them can be extracted
//! without inflating the rest. The manifest is always the final entry.

pub mod builder;
pub mod manifest;
pub mod reader;

use serde::{Deserialize, Serialize};

pub use builder::{build_archive, ArchiveInput};
pub use manifest::{BackupMode, Manifest, ManifestEntry, MANIFEST_ENTRY_NAME};
pub use reader::{extract_archive, has_zip_signature, matches_filter, read_manifest, ExtractSummary};

/// Per-entry compression codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    #[default]
    Deflate,
    Zstd,
    Store,
}

impl ArchiveCompression {
    pub fn to_zip(self) -> zip::CompressionMethod {
        match self {
            ArchiveCompression::Deflate => zip::CompressionMethod::Deflated,
            ArchiveCompression::Zstd => zip::CompressionMethod::Zstd,
            ArchiveCompression::Store => zip::CompressionMethod::Stored,
        }
    }
}

/// Backslashes become `/`; leading and trailing slashes are trimmed.
pub fn normalize_entry_path(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// True for a non-empty relative `/`-separated path with no empty, `.` or
/// `..` parts. Backslashes are never part of a stored name.
///
/// Host-specific restrictions (drive letters and the like) are checked
/// when an entry is mapped to a destination, not here.
pub fn is_safe_entry_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') {
        return false;
    }
    path.split('/').all(|part| {
        !part.is_empty() && part != "." && part != ".." && !part.contains('\\')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_entry_path() {
        assert_eq!(normalize_entry_path("logs\\app\\a.txt"), "logs/app/a.txt");
        assert_eq!(normalize_entry_path("/logs/"), "logs");
        assert_eq!(normalize_entry_path("dir/"), "dir");
        assert_eq!(normalize_entry_path("/"), "");
    }

    #[test]
    fn test_safe_entry_paths() {
        assert!(is_safe_entry_path("a.txt"));
        assert!(is_safe_entry_path("sub/.hidden/b"));
        assert!(!is_safe_entry_path(""));
        assert!(!is_safe_entry_path("/abs"));
        assert!(!is_safe_entry_path("a/../../etc"));
        assert!(!is_safe_entry_path("a//b"));
        assert!(!is_safe_entry_path("a\\b.txt"));
        assert!(is_safe_entry_path("reports/report:v2.txt"));
    }

    #[test]
    fn test_compression_config_names() {
        let parsed: ArchiveCompression = serde_json::from_str("\"zstd\"").unwrap();
        assert_eq!(parsed, ArchiveCompression::Zstd);
        assert_eq!(ArchiveCompression::default().to_zip(), zip::CompressionMethod::Deflated);
    }
}
