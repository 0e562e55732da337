//! Subcommand implementations.

use anyhow::{anyhow, bail, Context as _, Result};
use backup_engine::executor::{CommandDumpProducer, DumpProducer, UnconfiguredDump};
use backup_engine::models::{plan_artifacts, ArtifactName};
use backup_engine::schedule::compute_next_due;
use backup_engine::transfer::progress::format_bytes;
use backup_engine::transfer::{ProgressEvent, ProgressReporter, Stage};
use backup_engine::{
    open_storage, BackupEngine, BackupPlan, Config, JobTracker, RestoreEngine, Storage,
};
use chrono::{DateTime, Local, Utc};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a subcommand needs.
pub struct Context {
    pub config: Config,
    pub tracker: JobTracker,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(config: Config, cancel: CancellationToken) -> Self {
        Self {
            config,
            tracker: JobTracker::new(),
            cancel,
        }
    }

    fn dump_producer(&self) -> Arc<dyn DumpProducer> {
        match CommandDumpProducer::from_config(&self.config.dump) {
            Some(producer) => Arc::new(producer),
            None => Arc::new(UnconfiguredDump),
        }
    }
}

/// Logs each stage change at `info` and every tick at `debug`.
fn progress_logger(operation: &str) -> ProgressReporter {
    let operation = operation.to_string();
    let current: Mutex<Option<Stage>> = Mutex::new(None);
    ProgressReporter::new(Arc::new(move |event: ProgressEvent| {
        let mut current = current.lock().unwrap_or_else(|e| e.into_inner());
        if *current != Some(event.stage) {
            *current = Some(event.stage);
            info!(
                operation = %operation,
                stage = event.stage.label(),
                overall = event.overall,
                "Stage started"
            );
        }
        debug!(
            operation = %operation,
            stage = event.stage.label(),
            stage_percent = event.stage_percent,
            overall = event.overall,
            "Progress"
        );
    }))
}

/// Plans selected by id, or every enabled plan when `ids` is empty.
fn select_plans<'a>(config: &'a Config, ids: &[String]) -> Result<Vec<&'a BackupPlan>> {
    if ids.is_empty() {
        return Ok(config.backup_plans.iter().filter(|p| p.enabled).collect());
    }
    ids.iter()
        .map(|id| config.backup_plan(id).map_err(anyhow::Error::from))
        .collect()
}

pub async fn backup(ctx: &Context, plan_ids: &[String]) -> Result<()> {
    let plans = select_plans(&ctx.config, plan_ids)?;
    if plans.is_empty() {
        warn!("No enabled backup plans");
        return Ok(());
    }

    let engine = BackupEngine::new(ctx.config.engine.clone(), ctx.dump_producer());
    let mut failed = Vec::new();
    for plan in plans {
        if ctx.cancel.is_cancelled() {
            break;
        }
        if let Err(e) = backup_one(ctx, &engine, plan).await {
            error!(plan_id = %plan.id, error = %e, "Backup run failed");
            failed.push(plan.id.clone());
        }
    }

    if ctx.cancel.is_cancelled() {
        bail!("cancelled");
    }
    if !failed.is_empty() {
        bail!("{} backup(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

async fn backup_one(ctx: &Context, engine: &BackupEngine, plan: &BackupPlan) -> Result<()> {
    let _permit = ctx.tracker.try_start(&plan.id)?;
    let storage = open_storage(&plan.target)?;
    let progress = progress_logger(&format!("backup {}", plan.id));

    let outcome = engine
        .run(plan, storage.as_ref(), &progress, &ctx.cancel)
        .await?;

    println!(
        "{}\t{}\t{}\t{} files\t{:.1}s{}",
        outcome.plan_id,
        outcome.artifact,
        format_bytes(outcome.size),
        outcome.manifest.entries.len(),
        outcome.duration.as_secs_f64(),
        if outcome.verified { "\tverified" } else { "" }
    );
    if !outcome.retention.deleted.is_empty() {
        println!("  pruned: {}", outcome.retention.deleted.join(", "));
    }
    for failure in &outcome.retention.failures {
        println!("  retention: {}", failure);
    }
    if let Some(reason) = &outcome.retention.list_error {
        println!("  retention skipped: {}", reason);
    }
    Ok(())
}

/// Tracker key of a restore plan; restore ids may repeat backup plan ids.
fn restore_job_key(restore_id: &str) -> String {
    format!("restore:{}", restore_id)
}

/// Restore by plan id. With `artifact` only that artifact is extracted;
/// otherwise the chain ending at the plan's target is resolved.
pub async fn restore(ctx: &Context, restore_id: &str, artifact: Option<&str>) -> Result<()> {
    let restore = ctx.config.restore_plan(restore_id)?;
    let backup = ctx.config.backup_plan(&restore.backup_plan_id)?;
    let _permit = ctx.tracker.try_start(&restore_job_key(&restore.id))?;
    let storage = open_storage(&backup.target)?;
    let engine = RestoreEngine::new(ctx.config.engine.clone());
    let progress = progress_logger(&format!("restore {}", restore.id));

    let outcome = match artifact {
        Some(name) => {
            engine
                .restore_single(restore, backup, storage.as_ref(), name, &progress, &ctx.cancel)
                .await?
        }
        None => {
            engine
                .restore_chain(restore, backup, storage.as_ref(), &progress, &ctx.cancel)
                .await?
        }
    };

    println!(
        "{}\t{}\twritten {}\tskipped {}\t{:.1}s",
        outcome.restore_id,
        outcome.destination.display(),
        outcome.files_written,
        outcome.files_skipped,
        outcome.duration.as_secs_f64()
    );
    for name in &outcome.artifacts {
        println!("  from {}", name);
    }
    if outcome.run_once {
        println!(
            "  restore plan '{}' is run-once; remove it from the configuration",
            outcome.restore_id
        );
    }
    Ok(())
}

async fn artifacts_of(storage: &dyn Storage, plan: &BackupPlan) -> Result<Vec<String>> {
    let names = storage
        .list()
        .await
        .with_context(|| format!("listing {}", storage.describe()))?;
    Ok(plan_artifacts(&names, &plan.id))
}

pub async fn list(ctx: &Context, plan_id: &str) -> Result<()> {
    let plan = ctx.config.backup_plan(plan_id)?;
    let storage = open_storage(&plan.target)?;
    let names = artifacts_of(storage.as_ref(), plan).await?;
    if names.is_empty() {
        println!("no artifacts for {} at {}", plan.id, storage.describe());
        return Ok(());
    }
    for name in names {
        match ArtifactName::parse(&name) {
            Some(parsed) => println!(
                "{}\t{}\t{}",
                name,
                parsed.created_utc().format("%Y-%m-%d %H:%M:%S UTC"),
                if parsed.encrypted { "encrypted" } else { "plain" }
            ),
            None => println!("{}", name),
        }
    }
    Ok(())
}

pub fn next_due(ctx: &Context, plan_id: Option<&str>, now: DateTime<Local>) -> Result<()> {
    let plans: Vec<&BackupPlan> = match plan_id {
        Some(id) => vec![ctx.config.backup_plan(id)?],
        None => ctx.config.backup_plans.iter().filter(|p| p.enabled).collect(),
    };
    for plan in plans {
        let due: DateTime<Utc> = compute_next_due(&plan.schedule, &now);
        println!(
            "{}\t{}\t{}",
            plan.id,
            due.with_timezone(&Local).format("%Y-%m-%d %H:%M %Z"),
            due.format("%Y-%m-%dT%H:%M:%SZ")
        );
    }
    Ok(())
}

/// Download an artifact (the newest when unnamed) and print its manifest.
pub async fn verify(ctx: &Context, plan_id: &str, artifact: Option<&str>) -> Result<()> {
    let plan = ctx.config.backup_plan(plan_id)?;
    let storage = open_storage(&plan.target)?;
    let name = match artifact {
        Some(name) => name.to_string(),
        None => artifacts_of(storage.as_ref(), plan)
            .await?
            .pop()
            .ok_or_else(|| anyhow!("no artifacts for {}", plan.id))?,
    };

    let engine = RestoreEngine::new(ctx.config.engine.clone());
    let manifest = engine
        .inspect(plan, storage.as_ref(), &name, &ctx.cancel)
        .await?;
    println!(
        "{}\t{}\t{}\t{} files\t{}",
        name,
        manifest.mode,
        manifest.created_utc.format("%Y-%m-%d %H:%M:%S UTC"),
        manifest.entries.len(),
        format_bytes(manifest.total_bytes())
    );
    if let Some(dump) = &manifest.dump_file_name {
        println!("  dump: {}", dump);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        let root = dir.path().display().to_string().replace('\\', "/");
        let config = Config::from_toml_str(&format!(
            r#"
[engine]
staging_dir = "{root}/staging"

[[backup_plans]]
id = "docs"
source = {{ type = "folder", path = "{root}/src" }}
target = {{ type = "local", path = "{root}/remote" }}

[[backup_plans]]
id = "off"
enabled = false
source = {{ type = "file", path = "{root}/src/a.txt" }}
target = {{ type = "local", path = "{root}/remote" }}

[[restore_plans]]
id = "back"
backup_plan_id = "docs"
destination = "{root}/out"

[[restore_plans]]
id = "docs"
backup_plan_id = "docs"
destination = "{root}/same-id"
"#
        ))
        .unwrap();
        Context::new(config, CancellationToken::new())
    }

    #[test]
    fn test_select_plans_defaults_to_enabled() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let all: Vec<&str> = select_plans(&ctx.config, &[])
            .unwrap()
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(all, vec!["docs"]);

        let named = select_plans(&ctx.config, &["off".to_string()]).unwrap();
        assert_eq!(named[0].id, "off");
        assert!(select_plans(&ctx.config, &["nope".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_backup_then_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/sub")).unwrap();
        fs::write(dir.path().join("src/a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("src/sub/b.txt"), b"beta").unwrap();
        let ctx = context(&dir);

        backup(&ctx, &["docs".to_string()]).await.unwrap();
        assert_eq!(ctx.tracker.running_count(), 0);
        list(&ctx, "docs").await.unwrap();
        verify(&ctx, "docs", None).await.unwrap();

        restore(&ctx, "back", None).await.unwrap();
        assert_eq!(fs::read(dir.path().join("out/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dir.path().join("out/sub/b.txt")).unwrap(), b"beta");
    }

    #[tokio::test]
    async fn test_restore_and_backup_ids_do_not_collide() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.txt"), b"alpha").unwrap();
        let ctx = context(&dir);
        backup(&ctx, &["docs".to_string()]).await.unwrap();

        let backup_running = ctx.tracker.try_start("docs").unwrap();
        restore(&ctx, "docs", None).await.unwrap();
        assert_eq!(fs::read(dir.path().join("same-id/a.txt")).unwrap(), b"alpha");
        drop(backup_running);

        let _restore_running = ctx.tracker.try_start(&restore_job_key("docs")).unwrap();
        assert!(restore(&ctx, "docs", None).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_without_artifacts_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(verify(&ctx, "docs", None).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_backup_reports_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let ctx = context(&dir);
        ctx.cancel.cancel();
        assert!(backup(&ctx, &[]).await.is_err());
    }
}
