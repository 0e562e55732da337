//! In-flight run tracking: at most one run per plan id.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::utils::{EngineError, Result};

/// Tracks which plans currently have a run in flight.
#[derive(Clone, Default)]
pub struct JobTracker {
    running: Arc<Mutex<HashSet<String>>>,
}

/// Held for the duration of one run; dropping it frees the plan id.
#[must_use = "the plan is released as soon as the permit is dropped"]
pub struct RunPermit {
    plan_id: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // A poisoned set is still a valid set of ids.
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `plan_id`, or fail with `AlreadyRunning` if a run holds it.
    pub fn try_start(&self, plan_id: &str) -> Result<RunPermit> {
        let mut running = self.lock();
        if !running.insert(plan_id.to_string()) {
            return Err(EngineError::AlreadyRunning(plan_id.to_string()));
        }
        debug!(plan_id = %plan_id, "Run started");
        Ok(RunPermit {
            plan_id: plan_id.to_string(),
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, plan_id: &str) -> bool {
        self.lock().contains(plan_id)
    }

    /// Get count of running jobs
    pub fn running_count(&self) -> usize {
        self.lock().len()
    }
}

impl RunPermit {
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.plan_id);
        debug!(plan_id = %self.plan_id, "Run finished");
    }
}
