//! Filesystem storage backend implementation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{check_object_name, Storage, PARTIAL_SUFFIX};
use crate::transfer::{copy_file, ProgressFn};
use crate::utils::{EngineError, Result};

/// Directory-backed storage (local disk, mounted share).
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Keep `Cancelled` as-is, wrap everything else in the operation's variant.
fn map_failure(err: EngineError, fail: fn(String) -> EngineError) -> EngineError {
    match err {
        EngineError::Cancelled => EngineError::Cancelled,
        other => fail(other.to_string()),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn upload(
        &self,
        local: &Path,
        name: &str,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_object_name(name, EngineError::UploadFailed)?;
        fs::create_dir_all(&self.root).await.map_err(|e| {
            EngineError::UploadFailed(format!("create {}: {}", self.root.display(), e))
        })?;

        let partial = self.object_path(&format!("{}{}", name, PARTIAL_SUFFIX));
        let target = self.object_path(name);

        if let Err(e) = copy_file(local, &partial, progress, cancel).await {
            let _ = fs::remove_file(&partial).await;
            return Err(map_failure(e, EngineError::UploadFailed));
        }
        if let Err(e) = fs::rename(&partial, &target).await {
            let _ = fs::remove_file(&partial).await;
            return Err(EngineError::UploadFailed(format!("rename {}: {}", name, e)));
        }

        debug!(object = %name, root = %self.root.display(), "Stored object");
        Ok(())
    }

    async fn download(
        &self,
        name: &str,
        local: &Path,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_object_name(name, EngineError::DownloadFailed)?;
        let source = self.object_path(name);
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(EngineError::DownloadFailed(format!("{} not found", name)));
        }

        if let Err(e) = copy_file(&source, local, progress, cancel).await {
            let _ = fs::remove_file(local).await;
            return Err(map_failure(e, EngineError::DownloadFailed));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EngineError::ListFailed(format!("{}: {}", self.root.display(), e)))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::ListFailed(e.to_string()))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| EngineError::ListFailed(e.to_string()))?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(PARTIAL_SUFFIX) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        check_object_name(name, EngineError::DeleteFailed)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        fs::remove_file(self.object_path(name))
            .await
            .map_err(|e| EngineError::DeleteFailed(format!("{}: {}", name, e)))
    }
}
