use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── RestorePlan ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePlan {
    pub id: String,
    pub backup_plan_id: String,
    /// Target artifact name; the newest artifact of the plan when absent.
    #[serde(default)]
    pub artifact: Option<String>,
    pub destination: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
    /// Archive paths (files or directory prefixes) to restore; empty = all.
    #[serde(default)]
    pub include_paths: Vec<String>,
    /// Surfaced to the caller, who deletes the plan after it ran.
    #[serde(default)]
    pub run_once: bool,
}
