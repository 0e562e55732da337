//! Archive construction from a file or folder source.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::manifest::{Manifest, ManifestEntry, MANIFEST_ENTRY_NAME};
use super::{is_safe_entry_path, ArchiveCompression};
use crate::fs::metadata::FileMetadata;
use crate::fs::walker::{walk_directory, FileInfo};
use crate::transfer::copy::copy_blocking;
use crate::transfer::progress::{percent_of, ProgressFn};
use crate::utils::{EngineError, Result};

/// Input to the builder. Database dumps arrive as a `File`.
#[derive(Debug, Clone, Copy)]
pub enum ArchiveInput<'a> {
    File(&'a Path),
    Folder(&'a Path),
}

/// Build a zip archive at `archive_path` and return the completed manifest.
///
/// `manifest` supplies the plan metadata; its entries are replaced by the
/// files actually written. Blocking: callers on the runtime use
/// `spawn_blocking`.
pub fn build_archive(
    input: ArchiveInput<'_>,
    archive_path: &Path,
    mut manifest: Manifest,
    compression: ArchiveCompression,
    progress: &ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<Manifest> {
    let files = collect_inputs(input)?;
    check_entry_names(&files)?;
    let single_file = matches!(input, ArchiveInput::File(_));
    info!(
        archive = %archive_path.display(),
        files = files.len(),
        ?compression,
        "Building archive"
    );

    let file = File::create(archive_path).map_err(|e| {
        EngineError::ArchiveBuildFailed(format!("create {}: {}", archive_path.display(), e))
    })?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let base_options = SimpleFileOptions::default().compression_method(compression.to_zip());

    let mut entries = Vec::with_capacity(files.len());
    for (index, info) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut options = base_options
            .last_modified_time(zip_timestamp(&info.modified))
            .large_file(info.size >= u32::MAX as u64);
        if let Some(mode) = info.permissions {
            options = options.unix_permissions(mode);
        }

        zip.start_file(info.relative_path.as_str(), options)
            .map_err(|e| build_failed(&info.relative_path, e))?;

        let mut source = File::open(&info.path).map_err(|e| {
            EngineError::SourceNotFound(format!("{}: {}", info.path.display(), e))
        })?;
        let total = info.size;
        let written = copy_blocking(&mut source, &mut zip, cancel, |copied| {
            if single_file {
                progress(percent_of(copied, total));
            }
        })
        .map_err(|e| match e {
            EngineError::Io(io) => build_failed(&info.relative_path, io),
            other => other,
        })?;

        debug!(entry = %info.relative_path, bytes = written, "Added entry");
        entries.push(ManifestEntry {
            path: info.relative_path.clone(),
            size: written,
            last_write_utc: info.modified,
        });

        if !single_file {
            progress(percent_of(index as u64 + 1, files.len() as u64));
        }
    }

    manifest.entries = entries;
    let json = manifest.to_json()?;
    zip.start_file(MANIFEST_ENTRY_NAME, base_options)
        .map_err(|e| build_failed(MANIFEST_ENTRY_NAME, e))?;
    zip.write_all(json.as_bytes())
        .map_err(|e| build_failed(MANIFEST_ENTRY_NAME, e))?;

    let writer = zip.finish().map_err(|e| build_failed("central directory", e))?;
    let file = writer
        .into_inner()
        .map_err(|e| build_failed("flush", e.into_error()))?;
    file.sync_all().map_err(|e| build_failed("sync", e))?;

    progress(100);
    info!(
        archive = %archive_path.display(),
        entries = manifest.entries.len(),
        bytes = manifest.total_bytes(),
        "Archive complete"
    );
    Ok(manifest)
}

fn collect_inputs(input: ArchiveInput<'_>) -> Result<Vec<FileInfo>> {
    match input {
        ArchiveInput::File(path) => {
            if !path.is_file() {
                return Err(EngineError::SourceNotFound(path.display().to_string()));
            }
            let name = path
                .file_name()
                .ok_or_else(|| EngineError::SourceNotFound(path.display().to_string()))?
                .to_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    EngineError::ArchiveBuildFailed(format!(
                        "{}: file name is not valid UTF-8",
                        path.display()
                    ))
                })?;
            let meta = FileMetadata::from_path(path)?;
            Ok(vec![FileInfo {
                path: path.to_path_buf(),
                relative_path: name,
                size: meta.size,
                modified: meta.modified,
                permissions: meta.permissions,
            }])
        }
        ArchiveInput::Folder(path) => {
            if !path.is_dir() {
                return Err(EngineError::SourceNotFound(path.display().to_string()));
            }
            walk_directory(path).map_err(|e| {
                EngineError::ArchiveBuildFailed(format!("walk {}: {}", path.display(), e))
            })
        }
    }
}

/// Refuse names that could not be restored as written.
///
/// The manifest entry name is reserved at the archive root.
fn check_entry_names(files: &[FileInfo]) -> Result<()> {
    for info in files {
        if info.relative_path == MANIFEST_ENTRY_NAME {
            return Err(EngineError::ArchiveBuildFailed(format!(
                "{}: {} is reserved for the archive manifest",
                info.path.display(),
                MANIFEST_ENTRY_NAME
            )));
        }
        if !is_safe_entry_path(&info.relative_path) {
            return Err(EngineError::ArchiveBuildFailed(format!(
                "{}: name cannot be stored in an archive",
                info.path.display()
            )));
        }
    }
    Ok(())
}

fn build_failed(what: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::ArchiveBuildFailed(format!("{}: {}", what, err))
}

/// Zip timestamps cover 1980–2107 at two-second resolution; the manifest
/// keeps the exact value.
fn zip_timestamp(modified: &chrono::DateTime<chrono::Utc>) -> zip::DateTime {
    use chrono::{Datelike, Timelike};
    zip::DateTime::from_date_and_time(
        modified.year().clamp(1980, 2107) as u16,
        modified.month() as u8,
        modified.day() as u8,
        modified.hour() as u8,
        modified.minute() as u8,
        modified.second() as u8,
    )
    .unwrap_or_default()
}
