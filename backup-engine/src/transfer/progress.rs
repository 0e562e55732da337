//! Pipeline progress for backup and restore operations.
//!
//! Every stage reports a percentage local to itself. A fixed boundary table
//! maps `(stage, percent_in_stage)` to one overall 0–100 value, so a caller
//! can render a single bar across the whole pipeline.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Leaf-level progress sink: receives 0–100 for the running stage only.
pub type ProgressFn<'a> = dyn Fn(u8) + Send + Sync + 'a;

/// Pipeline stages, backup first, then restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Prepare,
    SqlBackup,
    Archive,
    Encrypt,
    Upload,
    Retention,
    Verify,
    Done,
    ChainScan,
    Download,
    Decrypt,
    Extract,
}

impl Stage {
    /// Overall-percent window `[start, end]` covered by this stage.
    ///
    /// Restore stages (`Download`, `Decrypt`, `Extract`) describe a single
    /// artifact restore; chain restores nest that pipeline inside 15–100.
    pub fn range(self) -> (u8, u8) {
        match self {
            Stage::Prepare => (0, 5),
            Stage::SqlBackup => (5, 10),
            Stage::Archive => (10, 75),
            Stage::Encrypt => (75, 95),
            Stage::Upload => (95, 100),
            Stage::Retention | Stage::Verify | Stage::Done => (100, 100),
            Stage::ChainScan => (0, 15),
            Stage::Download => (0, 40),
            Stage::Decrypt => (40, 60),
            Stage::Extract => (60, 100),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::SqlBackup => "sql-backup",
            Stage::Archive => "archive",
            Stage::Encrypt => "encrypt",
            Stage::Upload => "upload",
            Stage::Retention => "retention",
            Stage::Verify => "verify",
            Stage::Done => "done",
            Stage::ChainScan => "chain-scan",
            Stage::Download => "download",
            Stage::Decrypt => "decrypt",
            Stage::Extract => "extract",
        }
    }
}

/// Map a stage-local percentage onto the fixed boundary table.
pub fn overall_percent(stage: Stage, percent_in_stage: u8) -> u8 {
    let (start, end) = stage.range();
    let pct = percent_in_stage.min(100) as u32;
    (start as u32 + (end - start) as u32 * pct / 100) as u8
}

/// Integer percentage of `done` over `total`, clamped to 0–100.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// One progress tick as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub stage_percent: u8,
    pub overall: u8,
}

/// Callback for progress updates
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Routes stage ticks to a caller callback, rescaled into a window and
/// clamped so the overall value never decreases.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    window: (u8, u8),
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            window: (0, 100),
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// A reporter that drops every tick.
    pub fn silent() -> Self {
        Self {
            callback: None,
            window: (0, 100),
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Nest a sub-pipeline into `[start, end]` of this reporter's window.
    pub fn within(&self, start: u8, end: u8) -> Self {
        let (lo, hi) = self.window;
        let span = (hi - lo) as u32;
        let scale = |p: u8| (lo as u32 + span * p.min(100) as u32 / 100) as u8;
        Self {
            callback: self.callback.clone(),
            window: (scale(start), scale(end.max(start))),
            last: Arc::clone(&self.last),
        }
    }

    pub fn report(&self, stage: Stage, stage_percent: u8) {
        let Some(callback) = &self.callback else {
            return;
        };
        let (lo, hi) = self.window;
        let mapped = overall_percent(stage, stage_percent) as u32;
        let overall = (lo as u32 + (hi - lo) as u32 * mapped / 100) as u8;
        let previous = self.last.fetch_max(overall, Ordering::Relaxed);
        callback(ProgressEvent {
            stage,
            stage_percent: stage_percent.min(100),
            overall: overall.max(previous),
        });
    }

    /// Leaf sink for one stage, handed to codec/archive/storage calls.
    pub fn stage_fn(&self, stage: Stage) -> Arc<ProgressFn<'static>> {
        let reporter = self.clone();
        Arc::new(move |pct: u8| reporter.report(stage, pct))
    }

    /// Last overall value emitted through this reporter tree.
    pub fn last_overall(&self) -> u8 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::silent()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
