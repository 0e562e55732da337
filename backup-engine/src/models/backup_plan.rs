use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::crypto::DEFAULT_ITERATIONS;
use crate::schedule::Schedule;
use crate::utils::{EngineError, Result};

// ── BackupPlan ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPlan {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: Schedule,
    pub source: SourceDescriptor,
    pub target: TargetDescriptor,
    #[serde(default)]
    pub encryption: EncryptionDescriptor,
    #[serde(default)]
    pub retention: RetentionDescriptor,
    #[serde(default)]
    pub verify_after_create: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_sftp_port() -> u16 {
    22
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

impl BackupPlan {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Config("backup plan id is empty".into()));
        }
        if self.encryption.enabled {
            self.encryption.passphrase()?;
            if self.encryption.iterations == 0 {
                return Err(EngineError::Config(format!(
                    "plan {}: encryption iterations must be positive",
                    self.id
                )));
            }
        }
        if let SourceDescriptor::Database { database, .. } = &self.source {
            if database.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "plan {}: database name is empty",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// What gets backed up. Each variant carries only its own fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceDescriptor {
    File { path: PathBuf },
    Folder { path: PathBuf },
    Database { connection: String, database: String },
}

impl SourceDescriptor {
    /// Label stored in the manifest's `sourceType` field.
    pub fn type_label(&self) -> &'static str {
        match self {
            SourceDescriptor::File { .. } => "File",
            SourceDescriptor::Folder { .. } => "Folder",
            SourceDescriptor::Database { .. } => "Database",
        }
    }

    /// Human-readable label stored in the manifest's `sourceLabel` field.
    pub fn display_label(&self) -> String {
        match self {
            SourceDescriptor::File { path } | SourceDescriptor::Folder { path } => {
                path.display().to_string()
            }
            SourceDescriptor::Database { database, .. } => format!("database {}", database),
        }
    }
}

/// Where artifacts are stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetDescriptor {
    Local {
        path: PathBuf,
    },
    Sftp {
        host: String,
        #[serde(default = "default_sftp_port")]
        port: u16,
        username: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        private_key: Option<PathBuf>,
        #[serde(default)]
        remote_dir: String,
    },
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetDescriptor::Local { path } => f.debug_struct("Local").field("path", path).finish(),
            TargetDescriptor::Sftp { host, port, username, private_key, remote_dir, .. } => f
                .debug_struct("Sftp")
                .field("host", host)
                .field("port", port)
                .field("username", username)
                .field("private_key", private_key)
                .field("remote_dir", remote_dir)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptionDescriptor {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

impl EncryptionDescriptor {
    pub fn passphrase(&self) -> Result<&str> {
        match self.passphrase.as_deref() {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(EngineError::Config("encryption passphrase is not set".into())),
        }
    }
}

impl Default for EncryptionDescriptor {
    fn default() -> Self {
        Self {
            enabled: false,
            passphrase: None,
            iterations: default_iterations(),
        }
    }
}

impl fmt::Debug for EncryptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionDescriptor")
            .field("enabled", &self.enabled)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("iterations", &self.iterations)
            .finish()
    }
}

/// Number of artifacts to keep; 0 disables retention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionDescriptor {
    #[serde(default)]
    pub keep: usize,
}
