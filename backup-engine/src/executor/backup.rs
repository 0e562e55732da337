//! Backup orchestration.
//!
//! Prepare → (SqlBackup) → Archive → Encrypt|Copy → Upload → Retention →
//! (Verify) → Done. Any stage error before retention fails the run; the
//! staging directory is removed on every exit path.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::dump::DumpProducer;
use super::retention::{apply_retention, RetentionReport};
use super::staging::StagingArea;
use super::{ensure_active, run_blocking};
use crate::archive::{build_archive, has_zip_signature, read_manifest, ArchiveInput, Manifest};
use crate::config::EngineConfig;
use crate::crypto::{decrypt_file, encrypt_file};
use crate::models::artifact::is_encrypted_name;
use crate::models::{sanitize_plan_id, ArtifactName, BackupPlan, SourceDescriptor};
use crate::storage::Storage;
use crate::transfer::progress::format_bytes;
use crate::transfer::{copy_file, ProgressFn, ProgressReporter, Stage};
use crate::utils::{EngineError, Result};

/// Backup execution result
#[derive(Debug)]
pub struct BackupOutcome {
    pub plan_id: String,
    pub artifact: String,
    pub encrypted: bool,
    /// Size of the uploaded artifact
    pub size: u64,
    pub manifest: Manifest,
    pub retention: RetentionReport,
    pub verified: bool,
    pub duration: Duration,
}

pub struct BackupEngine {
    config: EngineConfig,
    dump: Arc<dyn DumpProducer>,
}

impl BackupEngine {
    pub fn new(config: EngineConfig, dump: Arc<dyn DumpProducer>) -> Self {
        Self { config, dump }
    }

    /// Run one backup of `plan` into `storage`.
    pub async fn run(
        &self,
        plan: &BackupPlan,
        storage: &dyn Storage,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<BackupOutcome> {
        let started = Instant::now();
        info!(plan_id = %plan.id, target = %storage.describe(), "Starting backup");

        let result = self.execute(plan, storage, progress, cancel).await;
        match &result {
            Ok(outcome) => info!(
                plan_id = %plan.id,
                artifact = %outcome.artifact,
                size = %format_bytes(outcome.size),
                files = outcome.manifest.entries.len(),
                duration_secs = started.elapsed().as_secs(),
                "Backup complete"
            ),
            Err(EngineError::Cancelled) => warn!(plan_id = %plan.id, "Backup cancelled"),
            Err(e) => error!(plan_id = %plan.id, error = %e, "Backup failed"),
        }
        result.map(|outcome| BackupOutcome {
            duration: started.elapsed(),
            ..outcome
        })
    }

    async fn execute(
        &self,
        plan: &BackupPlan,
        storage: &dyn Storage,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<BackupOutcome> {
        // Prepare
        progress.report(Stage::Prepare, 0);
        plan.validate()?;
        let created = Utc::now();
        let encrypted = plan.encryption.enabled;
        let name = ArtifactName::new(&plan.id, created, encrypted);
        let artifact = name.file_name();
        let staging = StagingArea::create(&self.config.staging_dir, &name.base_name())?;
        let mut manifest = Manifest::for_plan(plan, created);
        progress.report(Stage::Prepare, 100);

        // SqlBackup
        let (input_path, is_folder) = match &plan.source {
            SourceDescriptor::File { path } => (path.clone(), false),
            SourceDescriptor::Folder { path } => (path.clone(), true),
            SourceDescriptor::Database { connection, database } => {
                ensure_active(cancel)?;
                progress.report(Stage::SqlBackup, 0);
                let dump_name = format!("{}.dump", sanitize_plan_id(database));
                let dump_path = staging.subdir("dump")?.join(&dump_name);
                self.dump
                    .produce(connection, database, &dump_path, cancel)
                    .await
                    .map_err(|e| match e {
                        EngineError::Cancelled | EngineError::DumpFailed(_) => e,
                        other => EngineError::DumpFailed(other.to_string()),
                    })?;
                if !dump_path.is_file() {
                    return Err(EngineError::DumpFailed(format!(
                        "dump for {} produced no file",
                        database
                    )));
                }
                manifest.dump_file_name = Some(dump_name);
                progress.report(Stage::SqlBackup, 100);
                (dump_path, false)
            }
        };

        // Archive
        ensure_active(cancel)?;
        progress.report(Stage::Archive, 0);
        let raw_archive = staging.file(&format!("{}.raw.zip", name.base_name()))?;
        let manifest = {
            let sink = progress.stage_fn(Stage::Archive);
            let cancel = cancel.clone();
            let archive_path = raw_archive.clone();
            let compression = self.config.compression;
            run_blocking(EngineError::ArchiveBuildFailed, move || {
                let input = if is_folder {
                    ArchiveInput::Folder(&input_path)
                } else {
                    ArchiveInput::File(&input_path)
                };
                build_archive(input, &archive_path, manifest, compression, &*sink, &cancel)
            })
            .await?
        };

        // Encrypt | Copy
        ensure_active(cancel)?;
        progress.report(Stage::Encrypt, 0);
        let final_path = staging.file(&artifact)?;
        let sink = |pct: u8| progress.report(Stage::Encrypt, pct);
        if encrypted {
            let passphrase = plan.encryption.passphrase()?;
            encrypt_file(
                &raw_archive,
                &final_path,
                passphrase,
                plan.encryption.iterations,
                &sink,
                cancel,
            )
            .await?;
        } else {
            copy_file(&raw_archive, &final_path, &sink, cancel).await?;
        }
        // Raw archive is not needed past this point.
        let _ = tokio::fs::remove_file(&raw_archive).await;
        progress.report(Stage::Encrypt, 100);
        let size = tokio::fs::metadata(&final_path).await?.len();

        // Upload
        ensure_active(cancel)?;
        progress.report(Stage::Upload, 0);
        let sink = |pct: u8| progress.report(Stage::Upload, pct);
        storage.upload(&final_path, &artifact, &sink, cancel).await?;
        progress.report(Stage::Upload, 100);
        info!(plan_id = %plan.id, artifact = %artifact, size = size, "Artifact uploaded");

        // Retention
        progress.report(Stage::Retention, 0);
        let retention = apply_retention(storage, &plan.id, plan.retention.keep, cancel).await;

        // Verify
        let verified = if plan.verify_after_create {
            ensure_active(cancel)?;
            progress.report(Stage::Verify, 0);
            verify_artifact(plan, storage, &artifact, &manifest, &staging, cancel).await?;
            info!(plan_id = %plan.id, artifact = %artifact, "Artifact verified");
            true
        } else {
            false
        };

        progress.report(Stage::Done, 100);
        Ok(BackupOutcome {
            plan_id: plan.id.clone(),
            artifact,
            encrypted,
            size,
            manifest,
            retention,
            verified,
            duration: Duration::ZERO,
        })
    }
}

/// Download `artifact`, open it and compare its manifest with `expected`.
pub async fn verify_artifact(
    plan: &BackupPlan,
    storage: &dyn Storage,
    artifact: &str,
    expected: &Manifest,
    staging: &StagingArea,
    cancel: &CancellationToken,
) -> Result<()> {
    let found = fetch_manifest(plan, storage, artifact, staging, cancel).await?;
    if found.entries.len() != expected.entries.len() {
        return Err(EngineError::ManifestInvalid(format!(
            "{}: manifest lists {} entries, expected {}",
            artifact,
            found.entries.len(),
            expected.entries.len()
        )));
    }
    Ok(())
}

/// Download `artifact` into `staging` and read its manifest.
pub(crate) async fn fetch_manifest(
    plan: &BackupPlan,
    storage: &dyn Storage,
    artifact: &str,
    staging: &StagingArea,
    cancel: &CancellationToken,
) -> Result<Manifest> {
    let archive = fetch_archive(plan, storage, artifact, staging, &|_| {}, &|_| {}, cancel).await?;
    let manifest = run_blocking(EngineError::ArchiveReadFailed, {
        let archive = archive.clone();
        move || read_manifest(&archive)
    })
    .await;
    let _ = tokio::fs::remove_file(&archive).await;
    let _ = tokio::fs::remove_file(staging.dir().join(artifact)).await;
    manifest
}

/// Download `artifact` and, when encrypted, decrypt it. Returns the path of
/// a plain zip inside `staging`.
pub(crate) async fn fetch_archive(
    plan: &BackupPlan,
    storage: &dyn Storage,
    artifact: &str,
    staging: &StagingArea,
    download_progress: &ProgressFn<'_>,
    decrypt_progress: &ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let downloaded = staging.file(artifact)?;
    storage
        .download(artifact, &downloaded, download_progress, cancel)
        .await?;

    if !is_encrypted_name(artifact) {
        decrypt_progress(100);
        return Ok(downloaded);
    }

    let passphrase = plan.encryption.passphrase()?;
    let plain = staging.file(&format!("{}.plain.zip", artifact))?;
    decrypt_file(&downloaded, &plain, passphrase, cancel).await?;
    let _ = tokio::fs::remove_file(&downloaded).await;

    // A wrong key can still end in valid padding.
    let check = plain.clone();
    let is_zip = run_blocking(EngineError::DecryptionFailed, move || {
        Ok(has_zip_signature(&check)?)
    })
    .await?;
    if !is_zip {
        let _ = tokio::fs::remove_file(&plain).await;
        return Err(EngineError::DecryptionFailed(format!(
            "{}: wrong passphrase or corrupt container",
            artifact
        )));
    }
    decrypt_progress(100);
    Ok(plain)
}
