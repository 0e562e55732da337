//! Restore orchestration: single artifacts and resolved chains.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backup::{fetch_archive, fetch_manifest};
use super::chain::{order_chain, resolve_chain, ChainLink};
use super::staging::StagingArea;
use super::{ensure_active, run_blocking};
use crate::archive::{extract_archive, ExtractSummary, Manifest};
use crate::config::EngineConfig;
use crate::models::{plan_artifacts, sanitize_plan_id, BackupPlan, RestorePlan};
use crate::storage::Storage;
use crate::transfer::progress::percent_of;
use crate::transfer::{ProgressReporter, Stage};
use crate::utils::{EngineError, Result};

/// Restore execution result
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub restore_id: String,
    /// Artifacts restored, oldest first
    pub artifacts: Vec<String>,
    pub files_written: usize,
    pub files_skipped: usize,
    pub destination: PathBuf,
    /// The caller deletes the restore plan when set
    pub run_once: bool,
    pub duration: Duration,
}

pub struct RestoreEngine {
    config: EngineConfig,
}

/// Filter and overwrite behaviour for one extraction.
struct ExtractRequest<'a> {
    destination: &'a std::path::Path,
    include_paths: &'a [String],
    overwrite: bool,
}

impl RestoreEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Download, decrypt-or-copy and extract one artifact.
    pub async fn restore_single(
        &self,
        restore: &RestorePlan,
        backup: &BackupPlan,
        storage: &dyn Storage,
        artifact: &str,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RestoreOutcome> {
        let started = Instant::now();
        info!(restore_id = %restore.id, artifact = %artifact, "Starting restore");

        let staging = self.staging_for(restore)?;
        let request = ExtractRequest {
            destination: &restore.destination,
            include_paths: &restore.include_paths,
            overwrite: restore.overwrite,
        };
        let result =
            restore_artifact(backup, storage, artifact, &request, &staging, progress, cancel).await;

        let summary = log_result(restore, result)?;
        Ok(RestoreOutcome {
            restore_id: restore.id.clone(),
            artifacts: vec![artifact.to_string()],
            files_written: summary.written,
            files_skipped: summary.skipped,
            destination: restore.destination.clone(),
            run_once: restore.run_once,
            duration: started.elapsed(),
        })
    }

    /// Resolve the chain ending at the plan's target artifact (the newest
    /// when unset) and restore every link in order, overwriting.
    pub async fn restore_chain(
        &self,
        restore: &RestorePlan,
        backup: &BackupPlan,
        storage: &dyn Storage,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RestoreOutcome> {
        let started = Instant::now();
        info!(restore_id = %restore.id, backup_plan_id = %backup.id, "Starting chain restore");

        let staging = self.staging_for(restore)?;
        let result = async {
            let links = scan_chain(backup, storage, &staging, progress, cancel).await?;
            let target = match &restore.artifact {
                Some(name) => name.clone(),
                None => links
                    .last()
                    .map(|link| link.name.clone())
                    .ok_or_else(|| {
                        EngineError::ArtifactNotFound(format!("no artifacts for plan {}", backup.id))
                    })?,
            };
            let set: Vec<String> = resolve_chain(&links, &target)?
                .iter()
                .map(|link| link.name.clone())
                .collect();
            info!(
                restore_id = %restore.id,
                target = %target,
                chain = ?set,
                "Resolved restore chain"
            );

            let window = progress.within(15, 100);
            let request = ExtractRequest {
                destination: &restore.destination,
                include_paths: &restore.include_paths,
                overwrite: true,
            };
            let count = set.len() as u64;
            let mut total = ExtractSummary::default();
            for (i, name) in set.iter().enumerate() {
                ensure_active(cancel)?;
                let slice = window.within(
                    percent_of(i as u64, count),
                    percent_of(i as u64 + 1, count),
                );
                let summary =
                    restore_artifact(backup, storage, name, &request, &staging, &slice, cancel).await?;
                total.written += summary.written;
                total.skipped += summary.skipped;
            }
            Ok::<_, EngineError>((set, total))
        }
        .await;

        let (artifacts, summary) = log_result(restore, result)?;
        Ok(RestoreOutcome {
            restore_id: restore.id.clone(),
            artifacts,
            files_written: summary.written,
            files_skipped: summary.skipped,
            destination: restore.destination.clone(),
            run_once: restore.run_once,
            duration: started.elapsed(),
        })
    }

    /// Download `artifact` and return its parsed manifest.
    pub async fn inspect(
        &self,
        backup: &BackupPlan,
        storage: &dyn Storage,
        artifact: &str,
        cancel: &CancellationToken,
    ) -> Result<Manifest> {
        let staging = StagingArea::create(
            &self.config.staging_dir,
            &format!("inspect_{}", sanitize_plan_id(&backup.id)),
        )?;
        fetch_manifest(backup, storage, artifact, &staging, cancel).await
    }

    fn staging_for(&self, restore: &RestorePlan) -> Result<StagingArea> {
        StagingArea::create(
            &self.config.staging_dir,
            &format!("restore_{}", sanitize_plan_id(&restore.id)),
        )
    }
}

fn log_result<T>(restore: &RestorePlan, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => info!(restore_id = %restore.id, "Restore complete"),
        Err(EngineError::Cancelled) => warn!(restore_id = %restore.id, "Restore cancelled"),
        Err(e) => error!(
            restore_id = %restore.id,
            error = %e,
            "Restore failed; destination may hold a partial file set"
        ),
    }
    result
}

/// List, order and read the manifest of every artifact of `backup`.
async fn scan_chain(
    backup: &BackupPlan,
    storage: &dyn Storage,
    staging: &StagingArea,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<Vec<ChainLink>> {
    progress.report(Stage::ChainScan, 0);
    let listed = storage.list().await?;
    let names = order_chain(plan_artifacts(&listed, &backup.id))?;

    let mut links = Vec::with_capacity(names.len());
    let count = names.len() as u64;
    for (i, name) in names.into_iter().enumerate() {
        ensure_active(cancel)?;
        let manifest = fetch_manifest(backup, storage, &name, staging, cancel).await?;
        links.push(ChainLink { name, manifest });
        progress.report(Stage::ChainScan, percent_of(i as u64 + 1, count));
    }
    progress.report(Stage::ChainScan, 100);
    Ok(links)
}

async fn restore_artifact(
    backup: &BackupPlan,
    storage: &dyn Storage,
    artifact: &str,
    request: &ExtractRequest<'_>,
    staging: &StagingArea,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<ExtractSummary> {
    progress.report(Stage::Download, 0);
    let download = |pct: u8| progress.report(Stage::Download, pct);
    let decrypt = |pct: u8| progress.report(Stage::Decrypt, pct);
    let archive =
        fetch_archive(backup, storage, artifact, staging, &download, &decrypt, cancel).await?;

    ensure_active(cancel)?;
    progress.report(Stage::Extract, 0);
    let sink = progress.stage_fn(Stage::Extract);
    let destination = request.destination.to_path_buf();
    let include_paths = request.include_paths.to_vec();
    let overwrite = request.overwrite;
    let cancel_worker = cancel.clone();
    let extract_from = archive.clone();
    let summary = run_blocking(EngineError::ArchiveReadFailed, move || {
        extract_archive(
            &extract_from,
            &destination,
            &include_paths,
            overwrite,
            &*sink,
            &cancel_worker,
        )
    })
    .await;
    let _ = tokio::fs::remove_file(&archive).await;

    let summary = summary?;
    info!(
        artifact = %artifact,
        written = summary.written,
        skipped = summary.skipped,
        "Artifact restored"
    );
    Ok(summary)
}
