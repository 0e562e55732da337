//! Manifest lookup and selective extraction.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use super::manifest::{Manifest, MANIFEST_ENTRY_NAME};
use super::{is_safe_entry_path, normalize_entry_path};
use crate::fs::metadata::apply_to_path;
use crate::transfer::copy::copy_blocking;
use crate::transfer::progress::{percent_of, ProgressFn};
use crate::utils::{EngineError, Result};

/// Outcome of an extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub written: usize,
    pub skipped: usize,
}

type Archive = ZipArchive<BufReader<File>>;

fn open_archive(path: &Path) -> Result<Archive> {
    let file = File::open(path)
        .map_err(|e| EngineError::ArchiveReadFailed(format!("{}: {}", path.display(), e)))?;
    ZipArchive::new(BufReader::new(file))
        .map_err(|e| EngineError::ArchiveReadFailed(format!("{}: {}", path.display(), e)))
}

/// Whether `path` starts with a zip local-file or end-of-directory signature.
pub fn has_zip_signature(path: &Path) -> std::io::Result<bool> {
    let mut head = [0u8; 4];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(head == *b"PK\x03\x04" || head == *b"PK\x05\x06")
}

/// Locate and parse the manifest entry of `archive_path`.
pub fn read_manifest(archive_path: &Path) -> Result<Manifest> {
    let mut archive = open_archive(archive_path)?;
    manifest_from(&mut archive, archive_path)
}

fn manifest_from(archive: &mut Archive, archive_path: &Path) -> Result<Manifest> {
    let mut entry = match archive.by_name(MANIFEST_ENTRY_NAME) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(EngineError::ManifestMissing(archive_path.display().to_string()))
        }
        Err(e) => return Err(EngineError::ArchiveReadFailed(e.to_string())),
    };

    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| EngineError::ManifestInvalid(format!("not UTF-8 text: {}", e)))?;
    Manifest::from_json(&text)
}

/// Whether `entry_path` is selected by `filters`.
///
/// An empty filter list selects everything. Otherwise the entry must equal a
/// filter or sit below it as a directory prefix, compared case-insensitively.
pub fn matches_filter(entry_path: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let entry = normalize_entry_path(entry_path).to_lowercase();
    filters.iter().any(|filter| {
        let filter = normalize_entry_path(filter).to_lowercase();
        filter.is_empty()
            || entry == filter
            || (entry.len() > filter.len()
                && entry.starts_with(&filter)
                && entry.as_bytes()[filter.len()] == b'/')
    })
}

/// Host path for a normalized entry below `root`.
///
/// `None` for unsafe names and for parts the host would read as anything
/// other than a plain file name, such as a Windows drive prefix.
pub fn destination_for(root: &Path, entry_path: &str) -> Option<PathBuf> {
    if !is_safe_entry_path(entry_path) {
        return None;
    }
    let mut dest = root.to_path_buf();
    for part in entry_path.split('/') {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == part => dest.push(name),
            _ => return None,
        }
    }
    Some(dest)
}

/// Extract the entries selected by `include_paths` into `destination`.
///
/// Existing files are left alone unless `overwrite` is set. Progress is
/// processed over selected, ticked for written and skipped files alike.
/// Blocking: callers on the runtime use `spawn_blocking`.
pub fn extract_archive(
    archive_path: &Path,
    destination: &Path,
    include_paths: &[String],
    overwrite: bool,
    progress: &ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<ExtractSummary> {
    let mut archive = open_archive(archive_path)?;

    let modified: HashMap<String, _> = match manifest_from(&mut archive, archive_path) {
        Ok(manifest) => manifest
            .entries
            .into_iter()
            .map(|e| (e.path, e.last_write_utc))
            .collect(),
        Err(e) => {
            warn!(archive = %archive_path.display(), error = %e, "Extracting without manifest timestamps");
            HashMap::new()
        }
    };

    let mut selected = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| EngineError::ArchiveReadFailed(format!("entry {}: {}", index, e)))?;
        if entry.is_dir() || entry.name().ends_with('/') || entry.name().ends_with('\\') {
            continue;
        }
        let name = normalize_entry_path(entry.name());
        if name == MANIFEST_ENTRY_NAME {
            continue;
        }
        if !is_safe_entry_path(&name) {
            warn!(entry = %entry.name(), "Skipping unsafe archive entry");
            continue;
        }
        if matches_filter(&name, include_paths) {
            selected.push((index, name));
        }
    }

    std::fs::create_dir_all(destination)?;
    info!(
        archive = %archive_path.display(),
        destination = %destination.display(),
        selected = selected.len(),
        overwrite,
        "Extracting archive"
    );

    let total = selected.len() as u64;
    let mut summary = ExtractSummary::default();
    for (processed, (index, name)) in selected.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let dest = destination_for(destination, name).ok_or_else(|| {
            EngineError::ArchiveReadFailed(format!(
                "entry {} cannot be restored on this host",
                name
            ))
        })?;

        if dest.exists() && !overwrite {
            debug!(entry = %name, "Destination exists, skipping");
            summary.skipped += 1;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut entry = archive
                .by_index(*index)
                .map_err(|e| EngineError::ArchiveReadFailed(format!("{}: {}", name, e)))?;
            let mode = entry.unix_mode();
            let mut out = File::create(&dest)?;
            copy_blocking(&mut entry, &mut out, cancel, |_| {})?;
            drop(out);
            apply_to_path(&dest, modified.get(name).copied(), mode)?;
            summary.written += 1;
        }

        progress(percent_of(processed as u64 + 1, total));
    }

    if selected.is_empty() {
        progress(100);
    }

    info!(written = summary.written, skipped = summary.skipped, "Extraction complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::builder::{build_archive, ArchiveInput};
    use crate::archive::{ArchiveCompression, BackupMode};
    use chrono::Utc;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn filters(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn build_fixture(dir: &Path) -> Result<PathBuf> {
        let src = dir.join("src");
        std::fs::create_dir_all(src.join("logs/2024"))?;
        std::fs::create_dir_all(src.join("data"))?;
        std::fs::write(src.join("logs/a.txt"), b"log a")?;
        std::fs::write(src.join("logs/2024/b.txt"), b"log b")?;
        std::fs::write(src.join("logsbook.txt"), b"not a log")?;
        std::fs::write(src.join("data/b.txt"), b"data b")?;

        let archive = dir.join("fixture.zip");
        let template = Manifest {
            plan_id: "fx".into(),
            plan_name: "Fixture".into(),
            created_utc: Utc::now(),
            source_type: "Folder".into(),
            source_label: "fixture".into(),
            mode: BackupMode::Full,
            entries: Vec::new(),
            dump_file_name: None,
        };
        build_archive(
            ArchiveInput::Folder(&src),
            &archive,
            template,
            ArchiveCompression::Deflate,
            &|_| {},
            &CancellationToken::new(),
        )?;
        Ok(archive)
    }

    #[test]
    fn test_matches_filter() {
        assert!(matches_filter("logs/a.txt", &[]));
        assert!(matches_filter("logs/a.txt", &filters(&["logs"])));
        assert!(matches_filter("LOGS/A.txt", &filters(&["logs/"])));
        assert!(matches_filter("logs/a.txt", &filters(&["\\Logs\\a.TXT"])));
        assert!(!matches_filter("logsbook.txt", &filters(&["logs"])));
        assert!(!matches_filter("data/b.txt", &filters(&["logs"])));
    }

    #[test]
    fn test_destination_for() {
        let root = Path::new("/restore");
        assert_eq!(
            destination_for(root, "a/b.txt"),
            Some(PathBuf::from("/restore").join("a").join("b.txt"))
        );
        assert_eq!(
            destination_for(root, "reports/report:v2.txt"),
            Some(PathBuf::from("/restore").join("reports").join("report:v2.txt"))
        );
        assert_eq!(destination_for(root, "../etc/passwd"), None);
        assert_eq!(destination_for(root, ""), None);
    }

    #[cfg(windows)]
    #[test]
    fn test_destination_for_rejects_drive_prefixes() {
        let root = Path::new(r"C:\restore");
        assert_eq!(destination_for(root, "C:/Windows/win.ini"), None);
        assert_eq!(destination_for(root, "docs/D:"), None);
    }

    #[test]
    fn test_selective_extraction() -> Result<()> {
        let dir = TempDir::new()?;
        let archive = build_fixture(dir.path())?;
        let dest = dir.path().join("out");

        let summary = extract_archive(
            &archive,
            &dest,
            &filters(&["logs"]),
            false,
            &|_| {},
            &CancellationToken::new(),
        )?;

        assert_eq!(summary, ExtractSummary { written: 2, skipped: 0 });
        assert_eq!(std::fs::read(dest.join("logs/a.txt"))?, b"log a");
        assert!(dest.join("logs/2024/b.txt").exists());
        assert!(!dest.join("data/b.txt").exists());
        assert!(!dest.join("logsbook.txt").exists());
        assert!(!dest.join(MANIFEST_ENTRY_NAME).exists());
        Ok(())
    }

    #[test]
    fn test_existing_files_respect_overwrite_flag() -> Result<()> {
        let dir = TempDir::new()?;
        let archive = build_fixture(dir.path())?;
        let dest = dir.path().join("out");
        std::fs::create_dir_all(dest.join("data"))?;
        std::fs::write(dest.join("data/b.txt"), b"local edit")?;

        let ticks = std::sync::Mutex::new(Vec::new());
        let progress = |p: u8| ticks.lock().unwrap().push(p);
        let summary = extract_archive(&archive, &dest, &[], false, &progress, &CancellationToken::new())?;
        assert_eq!(summary, ExtractSummary { written: 3, skipped: 1 });
        assert_eq!(std::fs::read(dest.join("data/b.txt"))?, b"local edit");
        assert_eq!(ticks.lock().unwrap().as_slice(), &[25, 50, 75, 100]);

        let summary = extract_archive(&archive, &dest, &[], true, &|_| {}, &CancellationToken::new())?;
        assert_eq!(summary, ExtractSummary { written: 4, skipped: 0 });
        assert_eq!(std::fs::read(dest.join("data/b.txt"))?, b"data b");
        Ok(())
    }

    #[test]
    fn test_restores_manifest_timestamps() -> Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src)?;
        std::fs::write(src.join("old.txt"), b"old")?;
        let when = chrono::TimeZone::with_ymd_and_hms(&Utc, 2020, 2, 3, 4, 5, 7).unwrap();
        apply_to_path(&src.join("old.txt"), Some(when), None)?;

        let archive = dir.path().join("t.zip");
        let template = Manifest {
            plan_id: "t".into(),
            plan_name: String::new(),
            created_utc: Utc::now(),
            source_type: "Folder".into(),
            source_label: String::new(),
            mode: BackupMode::Full,
            entries: Vec::new(),
            dump_file_name: None,
        };
        build_archive(
            ArchiveInput::Folder(&src),
            &archive,
            template,
            ArchiveCompression::Deflate,
            &|_| {},
            &CancellationToken::new(),
        )?;

        let dest = dir.path().join("out");
        extract_archive(&archive, &dest, &[], false, &|_| {}, &CancellationToken::new())?;
        let restored = crate::fs::metadata::FileMetadata::from_path(&dest.join("old.txt"))?;
        assert_eq!(restored.modified, when);
        Ok(())
    }

    #[test]
    fn test_traversal_and_directory_entries_are_never_materialized() -> Result<()> {
        let dir = TempDir::new()?;
        let archive = dir.path().join("evil.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive)?);
            let options = SimpleFileOptions::default();
            zip.add_directory("folder/", options).unwrap();
            zip.start_file("../escape.txt", options).unwrap();
            zip.write_all(b"nope").unwrap();
            zip.start_file("ok/file.txt", options).unwrap();
            zip.write_all(b"fine").unwrap();
            zip.finish().unwrap();
        }

        let dest = dir.path().join("out");
        let summary = extract_archive(&archive, &dest, &[], false, &|_| {}, &CancellationToken::new())?;
        assert_eq!(summary.written, 1);
        assert!(!dir.path().join("escape.txt").exists());
        assert!(dest.join("ok/file.txt").exists());
        assert!(!dest.join("folder").is_file());
        Ok(())
    }

    #[test]
    fn test_missing_manifest() -> Result<()> {
        let dir = TempDir::new()?;
        let archive = dir.path().join("bare.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive)?);
            zip.start_file("x.txt", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"x").unwrap();
            zip.finish().unwrap();
        }
        assert!(matches!(read_manifest(&archive), Err(EngineError::ManifestMissing(_))));
        Ok(())
    }

    #[test]
    fn test_zip_signature() -> Result<()> {
        let dir = TempDir::new()?;
        let archive = build_fixture(dir.path())?;
        assert!(has_zip_signature(&archive)?);

        let short = dir.path().join("short.bin");
        std::fs::write(&short, b"PK")?;
        assert!(!has_zip_signature(&short)?);

        let noise = dir.path().join("noise.bin");
        std::fs::write(&noise, [0x13u8, 0x37, 0x00, 0xff, 0x42])?;
        assert!(!has_zip_signature(&noise)?);
        Ok(())
    }

    #[test]
    fn test_not_a_zip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("plain.zip");
        std::fs::write(&path, b"definitely not a zip file")?;
        assert!(matches!(read_manifest(&path), Err(EngineError::ArchiveReadFailed(_))));
        Ok(())
    }
}
