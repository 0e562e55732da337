//! Artifact naming: `{sanitized-plan-id}_{yyyyMMdd_HHmmss}.{ext}`.
//!
//! The embedded UTC timestamp makes ordinal name order equal chronological
//! order within one plan; retention and chain resolution rely on it.

use chrono::{DateTime, NaiveDateTime, Utc};

pub const PLAIN_EXT: &str = "zip";
pub const ENCRYPTED_EXT: &str = "zip.enc";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;

/// Replace everything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_plan_id(plan_id: &str) -> String {
    let sanitized: String = plan_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "plan".to_string()
    } else {
        sanitized
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub plan_prefix: String,
    pub created: NaiveDateTime,
    pub encrypted: bool,
}

impl ArtifactName {
    pub fn new(plan_id: &str, created: DateTime<Utc>, encrypted: bool) -> Self {
        Self {
            plan_prefix: sanitize_plan_id(plan_id),
            created: created.naive_utc(),
            encrypted,
        }
    }

    /// `{prefix}_{timestamp}` without extension.
    pub fn base_name(&self) -> String {
        format!("{}_{}", self.plan_prefix, self.created.format(TIMESTAMP_FORMAT))
    }

    pub fn extension(&self) -> &'static str {
        if self.encrypted {
            ENCRYPTED_EXT
        } else {
            PLAIN_EXT
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.base_name(), self.extension())
    }

    pub fn created_utc(&self) -> DateTime<Utc> {
        self.created.and_utc()
    }

    /// Parse a stored object name; `None` for anything not produced by the engine.
    pub fn parse(name: &str) -> Option<Self> {
        let (stem, encrypted) = if let Some(stem) = name.strip_suffix(".zip.enc") {
            (stem, true)
        } else if let Some(stem) = name.strip_suffix(".zip") {
            (stem, false)
        } else {
            return None;
        };

        if stem.len() < TIMESTAMP_LEN + 2 {
            return None;
        }
        let split = stem.len() - TIMESTAMP_LEN;
        let timestamp = stem.get(split..)?;
        let prefix = stem.get(..split)?.strip_suffix('_')?;
        if prefix.is_empty() || sanitize_plan_id(prefix) != prefix {
            return None;
        }

        let created = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            plan_prefix: prefix.to_string(),
            created,
            encrypted,
        })
    }

    /// True when `name` is an artifact of `plan_id` (matched by name prefix).
    pub fn belongs_to(name: &str, plan_id: &str) -> bool {
        Self::parse(name)
            .map(|parsed| parsed.plan_prefix == sanitize_plan_id(plan_id))
            .unwrap_or(false)
    }
}

/// The subset of `names` that belong to `plan_id`, sorted ascending
/// (oldest first).
pub fn plan_artifacts(names: &[String], plan_id: &str) -> Vec<String> {
    let mut own: Vec<String> = names
        .iter()
        .filter(|n| ArtifactName::belongs_to(n, plan_id))
        .cloned()
        .collect();
    own.sort();
    own
}

/// Encrypted flag for a stored name, falling back to the extension alone.
pub fn is_encrypted_name(name: &str) -> bool {
    name.ends_with(".enc")
}
