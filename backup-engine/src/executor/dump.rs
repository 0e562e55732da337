//! External database dump producers.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DumpConfig;
use crate::utils::{EngineError, Result};

/// Produces a single dump file for a database source before archiving.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    async fn produce(
        &self,
        connection: &str,
        database: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Runs a configured program, e.g. `pg_dump` or `mysqldump`.
#[derive(Debug, Clone)]
pub struct CommandDumpProducer {
    program: String,
    args: Vec<String>,
}

impl CommandDumpProducer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `None` when no dump program is configured.
    pub fn from_config(config: &DumpConfig) -> Option<Self> {
        config
            .program
            .as_ref()
            .filter(|p| !p.trim().is_empty())
            .map(|program| Self::new(program.clone(), config.args.clone()))
    }

    fn render_args(&self, connection: &str, database: &str, output: &Path) -> Vec<String> {
        let output = output.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{connection}", connection)
                    .replace("{database}", database)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

#[async_trait]
impl DumpProducer for CommandDumpProducer {
    async fn produce(
        &self,
        connection: &str,
        database: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = self.render_args(connection, database, output);
        info!(program = %self.program, database = %database, "Running database dump");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::DumpFailed(format!("failed to start {}: {}", self.program, e)))?;

        // Dropping the wait future kills the child.
        let result = tokio::select! {
            result = child.wait_with_output() => result,
            _ = cancel.cancelled() => {
                warn!(program = %self.program, "Dump cancelled, killing process");
                return Err(EngineError::Cancelled);
            }
        };

        let out = result.map_err(|e| EngineError::DumpFailed(format!("{}: {}", self.program, e)))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(EngineError::DumpFailed(format!(
                "{} exited with {}: {}",
                self.program,
                out.status,
                stderr.trim()
            )));
        }

        let size = tokio::fs::metadata(output)
            .await
            .map_err(|_| EngineError::DumpFailed(format!("{} produced no output file", self.program)))?
            .len();
        debug!(output = %output.display(), bytes = size, "Dump complete");
        Ok(())
    }
}

/// Used when the configuration names no dump program.
pub struct UnconfiguredDump;

#[async_trait]
impl DumpProducer for UnconfiguredDump {
    async fn produce(&self, _: &str, database: &str, _: &Path, _: &CancellationToken) -> Result<()> {
        Err(EngineError::Config(format!(
            "database source '{}' needs [dump].program to be configured",
            database
        )))
    }
}
