//! Storage port: where finished artifacts live.
//!
//! Backends store flat object names (artifact file names) below one
//! configured location. Uploads go to a `.partial` name first and are
//! renamed into place, so `list` never reports an in-flight object.

pub mod local;
pub mod sftp;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::TargetDescriptor;
use crate::transfer::ProgressFn;
use crate::utils::{EngineError, Result};

pub use local::LocalStorage;
pub use sftp::SftpStorage;

/// Suffix of objects still being uploaded.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short human-readable location, for logs.
    fn describe(&self) -> String;

    /// Copy `local` to object `name`, replacing any existing object.
    async fn upload(
        &self,
        local: &Path,
        name: &str,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Copy object `name` to `local`, replacing any existing file.
    async fn download(
        &self,
        name: &str,
        local: &Path,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Names of all stored objects; no directories, no partial uploads.
    async fn list(&self) -> Result<Vec<String>>;

    /// Remove object `name`.
    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()>;
}

/// Build the backend for a plan target.
pub fn open_storage(target: &TargetDescriptor) -> Result<Arc<dyn Storage>> {
    match target {
        TargetDescriptor::Local { path } => Ok(Arc::new(LocalStorage::new(path.clone()))),
        TargetDescriptor::Sftp {
            host,
            port,
            username,
            password,
            private_key,
            remote_dir,
        } => {
            if password.is_none() && private_key.is_none() {
                return Err(EngineError::Config(format!(
                    "sftp target {}: either password or private_key is required",
                    host
                )));
            }
            Ok(Arc::new(SftpStorage::new(
                host.clone(),
                *port,
                username.clone(),
                password.clone(),
                private_key.clone(),
                remote_dir.clone(),
            )))
        }
    }
}

/// Object names are single path components.
pub(crate) fn check_object_name(name: &str, fail: fn(String) -> EngineError) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.ends_with(PARTIAL_SUFFIX);
    if bad {
        return Err(fail(format!("invalid object name '{}'", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_names() {
        assert!(check_object_name("web_20240101_000000.zip", EngineError::UploadFailed).is_ok());
        assert!(check_object_name("../x.zip", EngineError::UploadFailed).is_err());
        assert!(check_object_name("a/b.zip", EngineError::DownloadFailed).is_err());
        assert!(check_object_name("x.zip.partial", EngineError::DeleteFailed).is_err());
        assert!(check_object_name("", EngineError::DeleteFailed).is_err());
    }

    #[test]
    fn test_sftp_target_requires_credentials() {
        let target = TargetDescriptor::Sftp {
            host: "nas".into(),
            port: 22,
            username: "bk".into(),
            password: None,
            private_key: None,
            remote_dir: "/b".into(),
        };
        assert!(matches!(open_storage(&target), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_local_target() {
        let target = TargetDescriptor::Local { path: "/mnt/backups".into() };
        let storage = open_storage(&target).unwrap();
        assert!(storage.describe().contains("/mnt/backups"));
    }
}
