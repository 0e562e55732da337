//! Backup and restore orchestration.

pub mod backup;
pub mod chain;
pub mod dump;
pub mod restore;
pub mod retention;
pub mod staging;

use tokio_util::sync::CancellationToken;

use crate::utils::{EngineError, Result};

pub use backup::{verify_artifact, BackupEngine, BackupOutcome};
pub use chain::{order_chain, resolve_chain, ChainLink};
pub use dump::{CommandDumpProducer, DumpProducer, UnconfiguredDump};
pub use restore::{RestoreEngine, RestoreOutcome};
pub use retention::{apply_retention, RetentionReport};
pub use staging::StagingArea;

/// Stage-boundary cancellation check.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}

/// Run a blocking stage on the blocking pool. A panicked or aborted worker
/// is reported through `fail`.
pub(crate) async fn run_blocking<T, F>(fail: fn(String) -> EngineError, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| fail(format!("worker task failed: {}", e)))?
}
