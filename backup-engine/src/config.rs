//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file with `BACKUP__`-prefixed environment
//! variable overrides (`BACKUP__ENGINE__STAGING_DIR=/var/tmp/staging`).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveCompression;
use crate::models::{BackupPlan, RestorePlan};
use crate::utils::{EngineError, Result};

/// Prefix for environment overrides; nested keys are joined with `__`.
pub const ENV_PREFIX: &str = "BACKUP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub backup_plans: Vec<BackupPlan>,
    #[serde(default)]
    pub restore_plans: Vec<RestorePlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root for per-run staging directories
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Per-entry archive compression (deflate, zstd, store)
    #[serde(default)]
    pub compression: ArchiveCompression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// External program producing database dumps.
///
/// `{connection}`, `{database}` and `{output}` in `args` are substituted
/// per run, e.g. `args = ["--dbname={connection}", "--file={output}"]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpConfig {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

// Default values
fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("backup-engine-staging")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            compression: ArchiveCompression::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(EngineError::Config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Plan ids are unique and every restore plan names a known backup plan.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for plan in &self.backup_plans {
            plan.validate()?;
            if !ids.insert(plan.id.as_str()) {
                return Err(EngineError::Config(format!("duplicate backup plan id '{}'", plan.id)));
            }
        }

        let mut restore_ids = HashSet::new();
        for restore in &self.restore_plans {
            if !restore_ids.insert(restore.id.as_str()) {
                return Err(EngineError::Config(format!(
                    "duplicate restore plan id '{}'",
                    restore.id
                )));
            }
            if !ids.contains(restore.backup_plan_id.as_str()) {
                return Err(EngineError::Config(format!(
                    "restore plan '{}' references unknown backup plan '{}'",
                    restore.id, restore.backup_plan_id
                )));
            }
        }
        Ok(())
    }

    pub fn backup_plan(&self, id: &str) -> Result<&BackupPlan> {
        self.backup_plans
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| EngineError::Config(format!("unknown backup plan '{}'", id)))
    }

    pub fn restore_plan(&self, id: &str) -> Result<&RestorePlan> {
        self.restore_plans
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| EngineError::Config(format!("unknown restore plan '{}'", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceDescriptor, TargetDescriptor};
    use chrono::Weekday;

    const SAMPLE: &str = r#"
        [engine]
        staging_dir = "/var/tmp/backup-staging"
        compression = "zstd"

        [log]
        level = "debug"

        [dump]
        program = "pg_dump"
        args = ["--dbname={connection}", "--file={output}"]

        [[backup_plans]]
        id = "docs"
        name = "Documents"
        schedule = { time = "01:30", days = ["Mon", "Thu"] }
        source = { type = "folder", path = "/srv/docs" }
        target = { type = "local", path = "/mnt/backups/docs" }
        encryption = { enabled = true, passphrase = "correct horse" }
        retention = { keep = 7 }
        verify_after_create = true

        [[backup_plans]]
        id = "crm"
        source = { type = "database", connection = "host=db", database = "crm" }
        target = { type = "sftp", host = "nas", username = "bk", password = "pw", remote_dir = "/backups" }

        [[restore_plans]]
        id = "docs-restore"
        backup_plan_id = "docs"
        destination = "/restore/docs"
        include_paths = ["reports"]
        run_once = true
    "#;

    #[test]
    fn test_sample_config() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.engine.staging_dir, PathBuf::from("/var/tmp/backup-staging"));
        assert_eq!(config.engine.compression, ArchiveCompression::Zstd);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.dump.program.as_deref(), Some("pg_dump"));

        let docs = config.backup_plan("docs").unwrap();
        assert_eq!(docs.schedule.days, vec![Weekday::Mon, Weekday::Thu]);
        assert_eq!(docs.retention.keep, 7);
        assert!(docs.encryption.enabled);
        assert!(matches!(docs.source, SourceDescriptor::Folder { .. }));

        let crm = config.backup_plan("crm").unwrap();
        assert!(matches!(crm.target, TargetDescriptor::Sftp { port: 22, .. }));

        let restore = config.restore_plan("docs-restore").unwrap();
        assert!(restore.run_once);
        assert!(config.restore_plan("nope").is_err());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.engine.compression, ArchiveCompression::Deflate);
        assert!(config.backup_plans.is_empty());
    }

    #[test]
    fn test_duplicate_plan_ids_rejected() {
        let text = r#"
            [[backup_plans]]
            id = "a"
            source = { type = "file", path = "/a" }
            target = { type = "local", path = "/b" }

            [[backup_plans]]
            id = "a"
            source = { type = "file", path = "/c" }
            target = { type = "local", path = "/d" }
        "#;
        assert!(matches!(Config::from_toml_str(text), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_dangling_restore_plan_rejected() {
        let text = r#"
            [[restore_plans]]
            id = "r"
            backup_plan_id = "missing"
            destination = "/x"
        "#;
        assert!(matches!(Config::from_toml_str(text), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
