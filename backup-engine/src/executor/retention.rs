//! Retention: keep the newest `keep` artifacts of a plan.
//!
//! Plan membership is decided by artifact-name prefix, not by the manifest
//! inside the artifact. Artifacts written under a previous plan id are
//! therefore never counted or pruned for the renamed plan.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::plan_artifacts;
use crate::storage::Storage;
use crate::utils::EngineError;

#[derive(Debug, Default)]
pub struct RetentionReport {
    /// Artifacts still present, newest first
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
    /// One `RetentionDeleteFailed` per artifact that could not be removed
    pub failures: Vec<EngineError>,
    /// Set when the listing itself failed and nothing was pruned
    pub list_error: Option<String>,
}

impl RetentionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.list_error.is_none()
    }
}

/// Delete everything beyond the newest `keep` artifacts of `plan_id`.
///
/// Never fails: listing and per-artifact delete errors are logged and
/// recorded in the report. `keep == 0` disables retention.
pub async fn apply_retention(
    storage: &dyn Storage,
    plan_id: &str,
    keep: usize,
    cancel: &CancellationToken,
) -> RetentionReport {
    let mut report = RetentionReport::default();
    if keep == 0 {
        return report;
    }

    let names = match storage.list().await {
        Ok(names) => names,
        Err(e) => {
            warn!(plan_id = %plan_id, error = %e, "Retention skipped, listing failed");
            report.list_error = Some(e.to_string());
            return report;
        }
    };

    let mut own = plan_artifacts(&names, plan_id);
    own.reverse();

    let surplus = own.split_off(keep.min(own.len()));
    report.kept = own;

    for name in surplus {
        if cancel.is_cancelled() {
            warn!(plan_id = %plan_id, "Retention interrupted by cancellation");
            report.kept.push(name);
            continue;
        }
        match storage.delete(&name, cancel).await {
            Ok(()) => {
                info!(plan_id = %plan_id, artifact = %name, "Removed old backup");
                report.deleted.push(name);
            }
            Err(e) => {
                let failure = EngineError::RetentionDeleteFailed {
                    name: name.clone(),
                    reason: e.to_string(),
                };
                warn!(plan_id = %plan_id, error = %failure, "Retention delete failed");
                report.kept.push(name);
                report.failures.push(failure);
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use crate::transfer::ProgressFn;
    use crate::utils::Result;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    fn seed(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_keeps_greatest_names() {
        let dir = TempDir::new().unwrap();
        seed(
            dir.path(),
            &[
                "web_20240101_020000.zip",
                "web_20240102_020000.zip.enc",
                "web_20240103_020000.zip",
                "web_20240104_020000.zip",
                "web_20240105_020000.zip",
                "webshop_20230101_020000.zip",
                "notes.txt",
            ],
        );
        let storage = LocalStorage::new(dir.path().to_path_buf());

        let report = apply_retention(&storage, "web", 2, &CancellationToken::new()).await;

        assert!(report.is_clean());
        assert_eq!(report.kept, vec!["web_20240105_020000.zip", "web_20240104_020000.zip"]);
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(
            remaining(dir.path()),
            vec![
                "notes.txt",
                "web_20240104_020000.zip",
                "web_20240105_020000.zip",
                "webshop_20230101_020000.zip",
            ]
        );
    }

    #[tokio::test]
    async fn test_keep_zero_disables_retention() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), &["p_20240101_000000.zip", "p_20240102_000000.zip"]);
        let storage = LocalStorage::new(dir.path().to_path_buf());

        let report = apply_retention(&storage, "p", 0, &CancellationToken::new()).await;
        assert!(report.deleted.is_empty());
        assert_eq!(remaining(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_renamed_plan_does_not_see_old_prefix() {
        let dir = TempDir::new().unwrap();
        seed(
            dir.path(),
            &[
                "old-id_20240101_000000.zip",
                "old-id_20240102_000000.zip",
                "new-id_20240103_000000.zip",
            ],
        );
        let storage = LocalStorage::new(dir.path().to_path_buf());

        let report = apply_retention(&storage, "new-id", 1, &CancellationToken::new()).await;
        assert!(report.deleted.is_empty());
        assert_eq!(remaining(dir.path()).len(), 3);
    }

    /// Storage whose deletes fail for one name.
    struct FlakyDelete {
        inner: LocalStorage,
        broken: String,
    }

    #[async_trait]
    impl Storage for FlakyDelete {
        fn describe(&self) -> String {
            "flaky".into()
        }
        async fn upload(&self, l: &Path, n: &str, p: &ProgressFn<'_>, c: &CancellationToken) -> Result<()> {
            self.inner.upload(l, n, p, c).await
        }
        async fn download(&self, n: &str, l: &Path, p: &ProgressFn<'_>, c: &CancellationToken) -> Result<()> {
            self.inner.download(n, l, p, c).await
        }
        async fn list(&self) -> Result<Vec<String>> {
            self.inner.list().await
        }
        async fn delete(&self, n: &str, c: &CancellationToken) -> Result<()> {
            if n == self.broken {
                return Err(EngineError::DeleteFailed("permission denied".into()));
            }
            self.inner.delete(n, c).await
        }
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_stop_the_rest() {
        let dir = TempDir::new().unwrap();
        seed(
            dir.path(),
            &[
                "p_20240101_000000.zip",
                "p_20240102_000000.zip",
                "p_20240103_000000.zip",
            ],
        );
        let storage = FlakyDelete {
            inner: LocalStorage::new(dir.path().to_path_buf()),
            broken: "p_20240102_000000.zip".into(),
        };

        let report = apply_retention(&storage, "p", 1, &CancellationToken::new()).await;
        assert_eq!(report.deleted, vec!["p_20240101_000000.zip"]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            EngineError::RetentionDeleteFailed { name, .. } if name == "p_20240102_000000.zip"
        ));
        assert_eq!(
            remaining(dir.path()),
            vec!["p_20240102_000000.zip", "p_20240103_000000.zip"]
        );
    }
}
