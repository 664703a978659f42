//! Test execution
//!
//! Supervises single engine runs and drives them as an ordered batch.

mod batch;
mod runner;

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::engine::{ArgumentError, EngineFault};
use crate::logstream::LogError;
use crate::models::TestDefinition;
use crate::trap::{ExitSignal, TrapError};

pub use batch::BatchOrchestrator;
pub use runner::RunSupervisor;

/// Why a single run did not succeed
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Arguments(#[from] ArgumentError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Trap(#[from] TrapError),

    #[error("Could not start engine thread")]
    Spawn(#[source] io::Error),

    #[error("Test failed: engine requested {0}")]
    ExecutionFailed(ExitSignal),

    #[error("Test failed")]
    Faulted(#[source] EngineFault),

    #[error("Test did not end within {0:?}")]
    TimedOut(Duration),

    #[error("Test run was interrupted")]
    Interrupted,
}

impl RunError {
    /// Failures of the environment rather than of the test
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RunError::Arguments(_) | RunError::Log(_) | RunError::Trap(_) | RunError::Spawn(_)
        )
    }
}

/// Batch-level verdict for a failed batch
#[derive(Error, Debug)]
pub enum BatchError {
    /// The build cannot proceed: configuration or I/O failure
    #[error("{context}")]
    Configuration {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A run terminated abnormally
    #[error("Execution of test '{definition}' failed")]
    Execution {
        definition: String,
        #[source]
        source: RunError,
    },

    /// The log holds error lines
    #[error("There were test errors, see logfile '{}' for further information", log_file.display())]
    TestErrors {
        log_file: PathBuf,
        line_number: usize,
        line: String,
    },

    #[error("Batch interrupted during test '{definition}'")]
    Interrupted { definition: String },
}

impl BatchError {
    pub fn configuration(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        BatchError::Configuration {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Attribute a run failure to its definition
    pub fn from_run(definition: &TestDefinition, error: RunError) -> Self {
        if error.is_configuration() {
            return BatchError::configuration(format!("Can't execute test '{definition}'"), error);
        }
        match error {
            RunError::Interrupted => BatchError::Interrupted {
                definition: definition.to_string(),
            },
            source => BatchError::Execution {
                definition: definition.to_string(),
                source,
            },
        }
    }

    /// Whether the build cannot proceed, as opposed to tests having failed
    pub fn is_build_failure(&self) -> bool {
        matches!(self, BatchError::Configuration { .. })
    }

    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            BatchError::Execution { .. } | BatchError::TestErrors { .. } => 1,
            BatchError::Configuration { .. } => 2,
            BatchError::Interrupted { .. } => 130,
        }
    }
}
