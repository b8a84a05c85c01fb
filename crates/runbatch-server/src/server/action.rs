//! The action executed once per generation.
//!
//! A run either spawns the configured program and waits for it to exit, or,
//! when no program is configured, sleeps for a fixed duration. The latter is
//! handy for exercising the debouncing behavior without side effects.

use crate::server::config::RunMode;
use runbatch::Action;
use std::process::ExitStatus;
use tokio::process::Command;

/// Why a run did not succeed. Reported to waiters and to telemetry.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}")]
    ExitStatus { program: String, status: ExitStatus },
}

#[derive(Debug, Clone)]
pub struct RunAction {
    mode: RunMode,
}

impl RunAction {
    pub const fn new(mode: RunMode) -> Self {
        Self { mode }
    }
}

impl Action for RunAction {
    type Error = RunError;

    async fn perform(&self) -> Result<(), Self::Error> {
        match &self.mode {
            RunMode::Simulate { duration } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Simulating run for {duration:?}");
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            RunMode::Command { program, args } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Running `{program}` with {args:?}");
                // If the scheduler is torn down mid-run the child goes with it.
                let status = Command::new(program)
                    .args(args)
                    .kill_on_drop(true)
                    .status()
                    .await
                    .map_err(|source| RunError::Spawn {
                        program: program.clone(),
                        source,
                    })?;

                if status.success() {
                    Ok(())
                } else {
                    Err(RunError::ExitStatus {
                        program: program.clone(),
                        status,
                    })
                }
            }
        }
    }
}
