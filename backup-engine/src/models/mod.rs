//! Plan and artifact models consumed read-only by the engine.

pub mod artifact;
pub mod backup_plan;
pub mod restore_plan;

pub use artifact::{plan_artifacts, sanitize_plan_id, ArtifactName};
pub use backup_plan::{
    BackupPlan, EncryptionDescriptor, RetentionDescriptor, SourceDescriptor, TargetDescriptor,
};
pub use restore_plan::RestorePlan;
