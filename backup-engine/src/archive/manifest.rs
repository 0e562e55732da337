//! Manifest types embedded in every archive.
//!
//! A manifest records every file in an artifact with its size and last write
//! time, together with the plan it came from and the backup mode. It is
//! serialized as `.backup-manifest.json`, always the last entry written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::is_safe_entry_path;
use crate::models::BackupPlan;
use crate::utils::{EngineError, Result};

/// Well-known archive entry holding the manifest.
pub const MANIFEST_ENTRY_NAME: &str = ".backup-manifest.json";

/// Field names in their canonical spelling, used to fold keys of
/// hand-edited manifests.
const KNOWN_FIELDS: &[&str] = &[
    "planId",
    "planName",
    "createdUtc",
    "sourceType",
    "sourceLabel",
    "mode",
    "entries",
    "dumpFileName",
    "path",
    "size",
    "lastWriteUtc",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum BackupMode {
    #[default]
    Full,
    Differential,
    Incremental,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMode::Full => write!(f, "Full"),
            BackupMode::Differential => write!(f, "Differential"),
            BackupMode::Incremental => write!(f, "Incremental"),
        }
    }
}

impl FromStr for BackupMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(BackupMode::Full),
            "differential" | "diff" => Ok(BackupMode::Differential),
            "incremental" | "incr" => Ok(BackupMode::Incremental),
            other => Err(format!("unknown backup mode '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for BackupMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Metadata for a single file in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub last_write_utc: DateTime<Utc>,
}

/// Backup manifest, serialized as `.backup-manifest.json` in each archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub plan_id: String,
    #[serde(default)]
    pub plan_name: String,
    pub created_utc: DateTime<Utc>,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub source_label: String,
    #[serde(default)]
    pub mode: BackupMode,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_file_name: Option<String>,
}

impl Manifest {
    /// Empty `Full` manifest for a run of `plan` started at `created_utc`.
    pub fn for_plan(plan: &BackupPlan, created_utc: DateTime<Utc>) -> Self {
        Self {
            plan_id: plan.id.clone(),
            plan_name: plan.display_name().to_string(),
            created_utc,
            source_type: plan.source.type_label().to_string(),
            source_label: plan.source.display_label(),
            mode: BackupMode::Full,
            entries: Vec::new(),
            dump_file_name: None,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Canonical pretty JSON with camelCase keys.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::ManifestInvalid(e.to_string()))
    }

    /// Parse a manifest, tolerating comments, trailing commas and field
    /// names in any letter case.
    pub fn from_json(text: &str) -> Result<Self> {
        let text = text.trim_start_matches('\u{feff}');
        let cleaned = strip_trailing_commas(&strip_comments(text));
        let raw: Value =
            serde_json::from_str(&cleaned).map_err(|e| EngineError::ManifestInvalid(e.to_string()))?;
        let manifest: Manifest = serde_json::from_value(canonicalize_keys(raw))
            .map_err(|e| EngineError::ManifestInvalid(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Entry paths must be unique, relative and slash-normalized.
    pub fn validate(&self) -> Result<()> {
        if self.plan_id.trim().is_empty() {
            return Err(EngineError::ManifestInvalid("planId is empty".into()));
        }
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !is_safe_entry_path(&entry.path) {
                return Err(EngineError::ManifestInvalid(format!(
                    "entry path '{}' is not a normalized relative path",
                    entry.path
                )));
            }
            if entry.path == MANIFEST_ENTRY_NAME {
                return Err(EngineError::ManifestInvalid("manifest lists itself".into()));
            }
            if !seen.insert(entry.path.as_str()) {
                return Err(EngineError::ManifestInvalid(format!(
                    "duplicate entry path '{}'",
                    entry.path
                )));
            }
        }
        Ok(())
    }
}

fn canonicalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                let canonical = KNOWN_FIELDS
                    .iter()
                    .find(|known| known.eq_ignore_ascii_case(&key))
                    .map(|known| known.to_string())
                    .unwrap_or(key);
                out.insert(canonical, canonicalize_keys(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize_keys).collect()),
        other => other,
    }
}

/// Remove `//` line comments and `/* */` block comments outside strings.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Drop commas that directly precede `}` or `]` outside strings.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            out.push(c);
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if !matches!(next, Some('}') | Some(']')) {
                out.push(c);
            }
        } else {
            out.push(c);
        }
        i += 1;
    }

    out
}
