//! Backup Engine Library
//!
//! Turns a file, folder or database dump into a manifest-indexed, optionally
//! encrypted archive, ships it to a storage backend, prunes old artifacts
//! and restores them again, single or as a resolved chain.

pub mod archive;
pub mod config;
pub mod crypto;
pub mod executor;
pub mod fs;
pub mod models;
pub mod schedule;
pub mod storage;
pub mod tracker;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, EngineConfig};
pub use executor::{BackupEngine, BackupOutcome, RestoreEngine, RestoreOutcome};
pub use models::{BackupPlan, RestorePlan};
pub use storage::{open_storage, Storage};
pub use tracker::{JobTracker, RunPermit};
pub use utils::errors::EngineError;
pub use utils::Result;
