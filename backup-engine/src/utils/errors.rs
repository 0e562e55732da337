//! Error taxonomy for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Database dump failed: {0}")]
    DumpFailed(String),

    #[error("Archive build failed: {0}")]
    ArchiveBuildFailed(String),

    #[error("Archive unreadable: {0}")]
    ArchiveReadFailed(String),

    #[error("Corrupt container header: {0}")]
    CorruptHeader(String),

    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u8),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Listing artifacts failed: {0}")]
    ListFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Manifest missing from archive: {0}")]
    ManifestMissing(String),

    #[error("Manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("No full backup found at or before {0}")]
    NoFullBackupFound(String),

    #[error("Retention could not delete {name}: {reason}")]
    RetentionDeleteFailed { name: String, reason: String },

    #[error("Plan already running: {0}")]
    AlreadyRunning(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for the storage-level failures a caller may want to retry.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            EngineError::UploadFailed(_)
                | EngineError::DownloadFailed(_)
                | EngineError::ListFailed(_)
                | EngineError::DeleteFailed(_)
        )
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
