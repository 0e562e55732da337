//! Backup chain resolution.
//!
//! Given the plan's artifacts in chronological order and a target, the
//! restore set is the contiguous run from the nearest `Full` at or before
//! the target through the target itself. The engine only writes `Full`
//! artifacts today, so that set has one element; the walk stays general.

use crate::archive::{BackupMode, Manifest};
use crate::utils::{EngineError, Result};

/// One artifact of a plan together with its embedded manifest.
#[derive(Debug, Clone)]
pub struct ChainLink {
    pub name: String,
    pub manifest: Manifest,
}

/// Sort names ascending and refuse duplicates; equal names leave the
/// chronological order undefined.
pub fn order_chain(mut names: Vec<String>) -> Result<Vec<String>> {
    names.sort();
    if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
        return Err(EngineError::Config(format!(
            "artifact name '{}' is listed more than once",
            pair[0]
        )));
    }
    Ok(names)
}

/// Minimal ordered slice of `links` needed to reconstruct `target`.
pub fn resolve_chain<'a>(links: &'a [ChainLink], target: &str) -> Result<&'a [ChainLink]> {
    let target_index = links
        .iter()
        .position(|link| link.name == target)
        .ok_or_else(|| EngineError::ArtifactNotFound(target.to_string()))?;

    let full_index = links[..=target_index]
        .iter()
        .rposition(|link| link.manifest.mode == BackupMode::Full)
        .ok_or_else(|| EngineError::NoFullBackupFound(target.to_string()))?;

    Ok(&links[full_index..=target_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn link(name: &str, mode: BackupMode) -> ChainLink {
        ChainLink {
            name: name.to_string(),
            manifest: Manifest {
                plan_id: "p".into(),
                plan_name: "p".into(),
                created_utc: Utc::now(),
                source_type: "Folder".into(),
                source_label: "/data".into(),
                mode,
                entries: Vec::new(),
                dump_file_name: None,
            },
        }
    }

    fn names(chain: &[ChainLink]) -> Vec<&str> {
        chain.iter().map(|l| l.name.as_str()).collect()
    }

    #[test]
    fn test_all_full_resolves_to_self() {
        let links = vec![
            link("A", BackupMode::Full),
            link("B", BackupMode::Full),
            link("C", BackupMode::Full),
        ];
        assert_eq!(names(resolve_chain(&links, "C").unwrap()), vec!["C"]);
        assert_eq!(names(resolve_chain(&links, "B").unwrap()), vec!["B"]);
    }

    #[test]
    fn test_differentials_walk_back_to_full() {
        let links = vec![
            link("A", BackupMode::Full),
            link("B", BackupMode::Differential),
            link("C", BackupMode::Incremental),
            link("D", BackupMode::Full),
        ];
        assert_eq!(names(resolve_chain(&links, "C").unwrap()), vec!["A", "B", "C"]);
        assert_eq!(names(resolve_chain(&links, "D").unwrap()), vec!["D"]);
    }

    #[test]
    fn test_missing_target() {
        let links = vec![link("A", BackupMode::Full)];
        assert!(matches!(
            resolve_chain(&links, "Z"),
            Err(EngineError::ArtifactNotFound(name)) if name == "Z"
        ));
    }

    #[test]
    fn test_no_full_before_target() {
        let links = vec![
            link("A", BackupMode::Differential),
            link("B", BackupMode::Differential),
            link("C", BackupMode::Full),
        ];
        assert!(matches!(
            resolve_chain(&links, "B"),
            Err(EngineError::NoFullBackupFound(_))
        ));
    }

    #[test]
    fn test_order_chain() {
        let ordered = order_chain(vec!["b".into(), "a".into(), "c".into()]).unwrap();
        assert_eq!(ordered, vec!["a", "b", "c"]);
        assert!(matches!(
            order_chain(vec!["a".into(), "b".into(), "a".into()]),
            Err(EngineError::Config(_))
        ));
    }
}
